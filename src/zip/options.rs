use encoding_rs::{Encoding, UTF_8};
use std::fmt;
use std::sync::Arc;

/// Policy hook called with every decoded entry name while an archive is
/// indexed. Returning an error rejects the whole archive.
pub trait NameValidator: Send + Sync {
    fn validate(&self, name: &str) -> Result<(), String>;
}

impl<F> NameValidator for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, name: &str) -> Result<(), String> {
        self(name)
    }
}

/// Rejects names containing `..` or starting with `/`, the usual
/// ingredients of path traversal when entries are extracted to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTraversalValidator;

impl NameValidator for PathTraversalValidator {
    fn validate(&self, name: &str) -> Result<(), String> {
        if name.starts_with('/') {
            return Err("absolute path".to_string());
        }
        if name.contains("..") {
            return Err("contains \"..\"".to_string());
        }
        Ok(())
    }
}

/// How an archive is opened.
///
/// ```
/// use zipindex::{OpenOptions, PathTraversalValidator};
///
/// let options = OpenOptions::new()
///     .charset(encoding_rs::SHIFT_JIS)
///     .validator(PathTraversalValidator);
/// assert!(options.validation_enabled());
/// ```
#[derive(Clone)]
pub struct OpenOptions {
    pub(crate) charset: &'static Encoding,
    pub(crate) validator: Option<Arc<dyn NameValidator>>,
    pub(crate) delete_on_open: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charset for names and comments of entries without the UTF-8 flag.
    pub fn charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = charset;
        self
    }

    /// Validate every entry name while indexing.
    pub fn validator(mut self, validator: impl NameValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Remove the file from the file system as soon as it has been opened.
    /// Its contents stay readable until the archive is closed.
    pub fn delete_on_open(mut self, delete: bool) -> Self {
        self.delete_on_open = delete;
        self
    }

    pub fn validation_enabled(&self) -> bool {
        self.validator.is_some()
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.charset
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            charset: UTF_8,
            validator: None,
            delete_on_open: false,
        }
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("charset", &self.charset.name())
            .field("validation_enabled", &self.validation_enabled())
            .field("delete_on_open", &self.delete_on_open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_validator() {
        let v = PathTraversalValidator;
        assert!(v.validate("a/b/c.txt").is_ok());
        assert!(v.validate("../etc/passwd").is_err());
        assert!(v.validate("a/../../b").is_err());
        assert!(v.validate("/abs").is_err());
    }

    #[test]
    fn closures_are_validators() {
        let options = OpenOptions::new().validator(|name: &str| {
            if name.ends_with(".exe") {
                Err("executables not allowed".to_string())
            } else {
                Ok(())
            }
        });
        let validator = options.validator.as_ref().unwrap();
        assert!(validator.validate("a.txt").is_ok());
        assert!(validator.validate("a.exe").is_err());
    }

    #[test]
    fn defaults() {
        let options = OpenOptions::default();
        assert_eq!(options.encoding(), UTF_8);
        assert!(!options.validation_enabled());
        assert!(!options.delete_on_open);
        assert!(format!("{options:?}").contains("UTF-8"));
    }
}
