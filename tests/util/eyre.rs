use std::sync::Once;

pub type TestResult<T = ()> = color_eyre::eyre::Result<T>;

static INSTALL: Once = Once::new();

/// Installs the colored panic and error report handlers along with a logger which goes through
/// the test harness' output capturing. Safe to call from every test.
pub(super) fn install() {
    INSTALL.call_once(|| {
        let _ = color_eyre::install();
    });
    let _ = env_logger::builder().is_test(true).try_init();
}

macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::color_eyre::eyre::ensure!((left_val == right_val), r#"assertion failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`"#, left_val, right_val);
            }
        }
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::color_eyre::eyre::ensure!((left_val == right_val), r#"assertion failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`: {}"#, left_val, right_val, ::core::format_args!($($arg)+));
            }
        }
    };
}

/// Checks that an expression, typically a `Result`, matches a pattern, reporting the actual
/// value otherwise.
macro_rules! ensure_matches {
    ($val:expr, $pat:pat $(if $guard:expr)? $(,)?) => {
        match &$val {
            $pat $(if $guard)? => {}
            other => ::color_eyre::eyre::bail!(
                "expected `{}` to match `{}`, got {:?}",
                stringify!($val),
                stringify!($pat),
                other,
            ),
        }
    };
}
