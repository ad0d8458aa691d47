fn main() {
    if let Err(e) = hushtype_lib::run() {
        eprintln!("hushtype: {}", e);
        std::process::exit(1);
    }
}
