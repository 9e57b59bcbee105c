//! Validation for [`super::GlobalConfig`], aggregating every problem rather than
//! stopping at the first.

use crate::ReplicoreResult;

use super::GlobalConfig;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(super) fn validate(config: &GlobalConfig) -> ReplicoreResult<()> {
    let mut problems = Vec::new();

    if config.concurrency == 0 {
        problems.push("concurrency must be at least 1".to_string());
    }
    if config.retry_policy.max_attempts == 0 {
        problems.push("retry_policy.max_attempts must be at least 1".to_string());
    }
    if let Some(0) = config.default_qps {
        problems.push("default_qps must be at least 1 when set".to_string());
    }
    if config.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        problems.push(format!("bind_addr '{}' is not a valid socket address", config.bind_addr));
    }
    if config.sqlite_path.as_os_str().is_empty() {
        problems.push("sqlite_path must not be empty".to_string());
    }

    match problems.len() {
        0 => crate::Ok(()),
        1 => Err(crate::ReplicoreError::ConfigValidation(problems.remove(0))),
        _ => Err(crate::ReplicoreError::ConfigValidationErrors(problems)),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = GlobalConfig::default();
        config.concurrency = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_bind_addr_rejected() {
        let mut config = GlobalConfig::default();
        config.bind_addr = "not-an-address".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_aggregates_multiple_problems() {
        let mut config = GlobalConfig::default();
        config.concurrency = 0;
        config.bind_addr = "nope".to_string();
        match validate(&config) {
            Err(crate::ReplicoreError::ConfigValidationErrors(problems)) => assert_eq!(problems.len(), 2),
            other => panic!("expected aggregated errors, got {other:?}"),
        }
    }
}
