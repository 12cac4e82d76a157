fn main() {
    if let Err(e) = helpdesk_lib::run() {
        eprintln!("helpdesk: {}", e);
        std::process::exit(1);
    }
}
