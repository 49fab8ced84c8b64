// Single-test execution wrapped in panic recovery, used by run_test!.

use super::TestResult;

/// Run one test closure under `catch_panic!`, turning a longjmp'd-to panic
/// into `TestResult::Panic` instead of unwinding through the harness.
pub fn run_single_test<F: FnOnce() -> TestResult>(name: &str, test_fn: F) -> TestResult {
    let mut captured: Option<TestResult> = None;
    let mut test_fn = Some(test_fn);

    let status = crate::catch_panic!({
        let result = (test_fn.take().unwrap())();
        let code = result.to_c_int();
        captured = Some(result);
        code
    });

    match captured {
        Some(result) => result,
        None => {
            crate::klog_error!("test {} panicked", name);
            let _ = status;
            TestResult::Panic
        }
    }
}
