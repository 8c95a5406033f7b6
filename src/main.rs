fn main() {
    if let Err(err) = lab_intake::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
