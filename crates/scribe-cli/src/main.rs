fn main() {
    std::process::exit(scribe_cli::run());
}
