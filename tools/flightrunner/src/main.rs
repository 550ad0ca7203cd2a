fn main() {
    match flightrunner::run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(if error.is_usage() {
                flightrunner::EXIT_USAGE
            } else {
                1
            });
        }
    }
}
