fn main() {
    if let Err(e) = prism_lib::run() {
        eprintln!("prism: {}", e);
        std::process::exit(1);
    }
}
