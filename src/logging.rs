/// Initializes the logger once per process; safe to call from both binaries.
pub fn init() {
    let _ = pretty_env_logger::try_init();
}
