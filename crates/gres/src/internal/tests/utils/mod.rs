#[cfg(test)]
pub mod env;
#[cfg(test)]
pub mod resources;

#[allow(unused)]
#[cfg(test)]
pub fn enable_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
pub fn expect_error_message<T>(result: anyhow::Result<T>, msg: &str) {
    match result {
        Ok(_) => panic!("Expected error, got Ok"),
        Err(error) => {
            let formatted = format!("{error:?}");
            if !formatted.contains(msg) {
                panic!("Did not find `{msg}` in `{formatted}`");
            }
        }
    }
}
