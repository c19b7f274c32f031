use domain::common::error::DomainError;
use domain::conntrack::entity::TimeoutRefresh;

/// Secondary port that pushes a kernel conntrack entry's timeout forward.
///
/// Offloaded packets bypass the host stack that would normally refresh the
/// entry, so active flows need an explicit refresh.
pub trait ConntrackTimeoutPort: Send {
    fn refresh_timeout(&mut self, request: &TimeoutRefresh) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conntrack_timeout_port_is_object_safe() {
        fn _check(_port: &dyn ConntrackTimeoutPort) {}
    }
}
