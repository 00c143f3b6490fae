//! Suite-style test support.
//!
//! Test functions return [`TestResult`] and use the `assert_*_test!` macros,
//! which log the failing expression through `dlog` and return early.
//! [`define_test_suite!`] turns a list of such functions into host `#[test]`s.

mod assertions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped)
    }
}

/// Run one suite function and log its outcome.
pub fn run_single_test(name: &str, test: impl FnOnce() -> TestResult) -> TestResult {
    let result = test();
    match result {
        TestResult::Pass => crate::dlog_debug!("TEST PASS: {}", name),
        TestResult::Skipped => crate::dlog_info!("TEST SKIP: {}", name),
        TestResult::Fail => crate::dlog_error!("TEST FAIL: {}", name),
    }
    result
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::dlog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::dlog_info!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

/// Expand suite functions into host `#[test]`s named `<suite>_<fn>`.
///
/// Must be invoked from a crate that links `std` in test builds; failure
/// lines logged by the assertion macros are routed to stderr.
#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, [$($test_fn:ident),* $(,)?]) => {
        $crate::paste::paste! {
            fn [<$suite_name _host_log>](
                level: $crate::dlog::DlogLevel,
                args: ::core::fmt::Arguments<'_>,
            ) {
                ::std::eprintln!("[{}] {}", level.tag(), args);
            }

            $(
                #[test]
                fn [<$suite_name _ $test_fn>]() {
                    $crate::dlog::dlog_register_backend([<$suite_name _host_log>]);
                    let result = $crate::testing::run_single_test(
                        concat!(stringify!($suite_name), "::", stringify!($test_fn)),
                        $test_fn,
                    );
                    assert!(result.is_pass(), "{} returned {:?}", stringify!($test_fn), result);
                }
            )*
        }
    };
}
