/// Microphone authorization status, cached process-wide once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    pub fn is_determined(&self) -> bool {
        !matches!(self, Self::NotDetermined)
    }
}
