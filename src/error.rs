use std::fmt::Display;

use anyhow::Error;

/// Terminate the process with a readable message instead of panicking.
pub trait NiceError<T> {
    /// Print the error with all its causes and exit with `1`. Otherwise return the content.
    fn nice_unwrap(self) -> T;

    /// Like [`NiceError::nice_unwrap`] but prefixing the error with `mex`.
    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T;
}

fn print_error(error: &Error) {
    debug!("{:?}", error);
    eprintln!("Error: {error}");
    for cause in error.chain().skip(1) {
        eprintln!("\nCaused by:\n    {cause}");
    }
}

impl<T, E: Into<Error>> NiceError<T> for Result<T, E> {
    fn nice_unwrap(self) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(&e.into());
                std::process::exit(1);
            }
        }
    }

    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(&e.into().context(mex));
                std::process::exit(1);
            }
        }
    }
}
