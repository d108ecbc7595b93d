use std::borrow::Cow;
use std::fmt;

/// Named partition of the session store holding one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_and_owned_names_compare_equal() {
        const PROFILE: Namespace = Namespace::new("profile-cache");
        assert_eq!(PROFILE, Namespace::owned("profile-cache"));
        assert_eq!(PROFILE.to_string(), "profile-cache");
    }
}
