fn main() -> std::process::ExitCode {
    camdesk_lib::run()
}
