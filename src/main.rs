fn main() {
    if let Err(err) = schema_governor::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
