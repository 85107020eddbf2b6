use std::fmt;

/// Bearer token for the inference API. Only ever held in memory.
pub struct Credential {
    token: Option<String>,
    editable: bool,
}

impl Credential {
    /// Token fixed at deployment time.
    pub fn configured(token: String) -> Self {
        Self { token: Some(token), editable: false }
    }

    /// Token typed in by the user, initially missing.
    pub const fn interactive() -> Self {
        Self { token: None, editable: true }
    }

    pub fn get(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub const fn is_editable(&self) -> bool {
        self.editable
    }

    /// Returns false when the token is blank.
    pub fn set(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }

        self.token = Some(token.into());
        true
    }

    pub fn forget(&mut self) {
        self.token = None;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("editable", &self.editable)
            .finish()
    }
}
