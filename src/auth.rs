//! Static allow-list checked before any chat update is processed.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    usernames: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            usernames: usernames
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        }
    }

    /// Parses the comma separated `ALLOWED_USERS` form.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(',').map(str::trim))
    }

    /// Users without a username are never allowed.
    pub fn permits(&self, username: Option<&str>) -> bool {
        username.is_some_and(|name| self.usernames.contains(name))
    }

    pub fn len(&self) -> usize {
        self.usernames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usernames.is_empty()
    }
}
