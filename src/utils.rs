//! Convenience functions throughout the crate go here
use openidconnect::url::{self, Url};
use std::io::Read;
use std::path::Path;

pub fn join_url(root: &str, route: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(root)?;
    let joined = base.join(route)?;
    Ok(joined.into())
}

fn trim_trailing_whitespace(s: &str) -> String {
    s.trim_end().to_string()
}

/// Reads a client secret from a file, ignoring the trailing newline most editors leave behind.
pub fn load_secret_file<P: AsRef<Path>>(secret_file: P) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(secret_file.as_ref())?;
    let mut contents = String::new();

    file.read_to_string(&mut contents)?;
    Ok(trim_trailing_whitespace(&contents))
}

/// Hides all but the last four characters of a secret so it can be shown on a page.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    let tail: String = secret.chars().skip(count.saturating_sub(4)).collect();
    format!("****{}", tail)
}
