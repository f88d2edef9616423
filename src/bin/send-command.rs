#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use clap::{Arg, ArgAction, Command};
    use hat_logger::control;
    use std::process::exit;

    env_logger::init();

    let matches = Command::new("send-command")
        .about("Send a command to the sensor controller")
        .arg(
            Arg::new("command")
                .action(ArgAction::Append)
                .num_args(1..=2)
                .required(true)
                .help("START, STOP, STATUS or SET_RATE <value>"),
        )
        .get_matches();

    let words: Vec<String> = matches
        .get_many::<String>("command")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let command = match control::Command::from_args(&words) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    match control::send(&control::default_paths(), &command) {
        Ok(reply) => {
            print!("{}", reply);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Make sure the sensor controller is running.");
            exit(1);
        }
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("send-command needs Unix domain sockets");
    std::process::exit(1);
}
