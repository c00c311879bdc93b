use std::time::Duration;

#[cfg(not(any(
    feature = "default-timeout-10s",
    feature = "default-timeout-30s",
    feature = "default-timeout-60s"
)))]
compile_error!("Select one of the default-timeout-x features");

#[cfg(all(
    feature = "default-timeout-10s",
    any(feature = "default-timeout-30s", feature = "default-timeout-60s")
))]
compile_error!("Select only one of the default-timeout-x features");
#[cfg(all(
    feature = "default-timeout-30s",
    any(feature = "default-timeout-10s", feature = "default-timeout-60s")
))]
compile_error!("Select only one of the default-timeout-x features");
#[cfg(all(
    feature = "default-timeout-60s",
    any(feature = "default-timeout-10s", feature = "default-timeout-30s")
))]
compile_error!("Select only one of the default-timeout-x features");

#[cfg(feature = "default-timeout-10s")]
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(feature = "default-timeout-30s")]
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
#[cfg(feature = "default-timeout-60s")]
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Default request timeout set via feature flags of the ocpp_dispatch crate.
    Default,
    /// Specified timeout in milliseconds.
    Millis(u64),
}

impl Timeout {
    pub fn duration(&self) -> Duration {
        match self {
            Timeout::Default => DEFAULT_TIMEOUT,
            Timeout::Millis(millis) => Duration::from_millis(*millis),
        }
    }
}

impl From<Duration> for Timeout {
    /// Rounds up to whole milliseconds, a non-zero duration never becomes `Millis(0)`.
    fn from(d: Duration) -> Self {
        let partial = u128::from(d.subsec_nanos() % 1_000_000 != 0);
        let millis = d.as_millis() + partial;
        Timeout::Millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_duration_rounds_up() {
        assert_eq!(Timeout::from(Duration::from_micros(500)), Timeout::Millis(1));
        assert_eq!(Timeout::from(Duration::from_micros(1500)), Timeout::Millis(2));
        assert_eq!(Timeout::from(Duration::from_millis(250)), Timeout::Millis(250));
        assert_eq!(Timeout::from(Duration::ZERO), Timeout::Millis(0));
        assert_eq!(Timeout::from(Duration::MAX), Timeout::Millis(u64::MAX));
        assert_eq!(Timeout::Millis(250).duration(), Duration::from_millis(250));
    }
}
