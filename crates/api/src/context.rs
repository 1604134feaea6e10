use forgejobs_core::PrincipalId;

/// Principal context for a request.
///
/// Always present on routed requests; `principal_id` is `None` when the
/// caller did not identify itself (e.g. an external worker posting updates).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PrincipalContext {
    principal_id: Option<PrincipalId>,
}

impl PrincipalContext {
    pub fn new(principal_id: Option<PrincipalId>) -> Self {
        Self { principal_id }
    }

    pub fn principal_id(&self) -> Option<PrincipalId> {
        self.principal_id
    }
}
