// src/paymaster/manager.rs
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::GaslessError;
use crate::paymaster::Paymaster;
use crate::types::{PaymasterPolicy, SponsorshipResponse, UserOperation};
use crate::user_op::call_data_target;

struct Registration {
    id: String,
    paymaster: Arc<dyn Paymaster>,
    policy: Option<PaymasterPolicy>,
}

/// The paymaster picked for an operation.
#[derive(Clone)]
pub struct SelectedPaymaster {
    pub id: String,
    pub paymaster: Arc<dyn Paymaster>,
}

impl fmt::Debug for SelectedPaymaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedPaymaster")
            .field("id", &self.id)
            .field("address", &self.paymaster.address())
            .finish()
    }
}

/// Paymasters in registration order, each with an optional policy.
#[derive(Default)]
pub struct PaymasterManager {
    registrations: Vec<Registration>,
}

impl PaymasterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a paymaster. Re-registering an id replaces it in place.
    pub fn register_paymaster(
        &mut self,
        id: impl Into<String>,
        paymaster: Arc<dyn Paymaster>,
        policy: Option<PaymasterPolicy>,
    ) {
        let id = id.into();
        info!("Registering paymaster {} at {:?}", id, paymaster.address());
        let registration = Registration {
            id: id.clone(),
            paymaster,
            policy,
        };
        match self.registrations.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
    }

    pub fn unregister_paymaster(&mut self, id: &str) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        before != self.registrations.len()
    }

    pub fn set_policy(&mut self, id: &str, policy: Option<PaymasterPolicy>) -> bool {
        match self.registrations.iter_mut().find(|r| r.id == id) {
            Some(registration) => {
                registration.policy = policy;
                true
            }
            None => false,
        }
    }

    pub fn policy(&self, id: &str) -> Option<&PaymasterPolicy> {
        self.registrations
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.policy.as_ref())
    }

    pub fn paymaster_ids(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.id.as_str()).collect()
    }

    /// First paymaster, in registration order, that agrees to sponsor and whose
    /// policy accepts the operation. Paymasters that error are skipped.
    pub async fn find_best_paymaster(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
    ) -> Option<SelectedPaymaster> {
        for registration in &self.registrations {
            let eligibility = match registration
                .paymaster
                .can_sponsor(user_op.sender, user_op.call_data.clone(), chain_id)
                .await
            {
                Ok(eligibility) => eligibility,
                Err(e) => {
                    warn!("Paymaster {} check failed: {}", registration.id, e);
                    continue;
                }
            };

            if !eligibility.can_sponsor {
                debug!(
                    "Paymaster {} declined: {}",
                    registration.id,
                    eligibility.reason.as_deref().unwrap_or("no reason given")
                );
                continue;
            }

            if let Some(policy) = &registration.policy {
                if !check_policy_compliance(user_op, policy) {
                    debug!("Paymaster {} policy rejected operation", registration.id);
                    continue;
                }
            }

            return Some(SelectedPaymaster {
                id: registration.id.clone(),
                paymaster: registration.paymaster.clone(),
            });
        }
        None
    }

    /// Sponsors through the best paymaster. `Ok(None)` when none qualifies.
    pub async fn sponsor_user_operation(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
    ) -> Result<Option<(String, SponsorshipResponse)>, GaslessError> {
        let Some(selected) = self.find_best_paymaster(user_op, chain_id).await else {
            return Ok(None);
        };
        let response = selected.paymaster.sponsor(user_op.clone(), chain_id).await?;
        Ok(Some((selected.id, response)))
    }
}

/// Gas-fee ceiling plus allow/block lists on the leading call data bytes
/// (see [`call_data_target`]). Rate-window fields are not enforced here.
pub fn check_policy_compliance(user_op: &UserOperation, policy: &PaymasterPolicy) -> bool {
    if user_op.max_fee_per_gas > policy.sponsorship_limit {
        return false;
    }

    let target = call_data_target(&user_op.call_data);

    if let Some(allowed) = policy.allowed_targets.as_ref().filter(|a| !a.is_empty()) {
        match target {
            Some(target) if allowed.contains(&target) => {}
            _ => return false,
        }
    }

    if let (Some(blocked), Some(target)) = (&policy.blocked_targets, target) {
        if blocked.contains(&target) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use ethers::types::{Address, Bytes, U256};

    use super::*;
    use crate::paymaster::MockPaymaster;
    use crate::types::CanSponsorResponse;

    fn mock(address: u64, outcome: Result<bool, ()>) -> Arc<dyn Paymaster> {
        let mut paymaster = MockPaymaster::new();
        paymaster
            .expect_address()
            .return_const(Address::from_low_u64_be(address));
        paymaster
            .expect_can_sponsor()
            .returning(move |_, _, _| match outcome {
                Ok(true) => Ok(CanSponsorResponse::approved()),
                Ok(false) => Ok(CanSponsorResponse::denied("nope")),
                Err(()) => Err(GaslessError::Network("connection reset".to_string())),
            });
        Arc::new(paymaster)
    }

    fn policy(limit: u64) -> PaymasterPolicy {
        PaymasterPolicy {
            sponsorship_limit: U256::from(limit),
            time_window: 3_600,
            max_operations_per_time_window: 10,
            ..Default::default()
        }
    }

    fn op_to(target: Address, max_fee: u64) -> UserOperation {
        let mut call_data = target.as_bytes().to_vec();
        call_data.extend_from_slice(&[0u8; 32]);
        UserOperation {
            call_data: Bytes::from(call_data),
            max_fee_per_gas: U256::from(max_fee),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn returns_first_eligible_in_registration_order() {
        let mut manager = PaymasterManager::new();
        manager.register_paymaster("declines", mock(1, Ok(false)), None);
        manager.register_paymaster("first", mock(2, Ok(true)), None);
        manager.register_paymaster("second", mock(3, Ok(true)), None);

        let selected = manager
            .find_best_paymaster(&UserOperation::default(), 1)
            .await
            .unwrap();
        assert_eq!(selected.id, "first");
        assert_eq!(selected.paymaster.address(), Address::from_low_u64_be(2));
    }

    #[tokio::test]
    async fn skips_paymaster_that_errors() {
        let mut manager = PaymasterManager::new();
        manager.register_paymaster("broken", mock(1, Err(())), None);
        manager.register_paymaster("working", mock(2, Ok(true)), None);

        let selected = manager
            .find_best_paymaster(&UserOperation::default(), 1)
            .await
            .unwrap();
        assert_eq!(selected.id, "working");
    }

    #[tokio::test]
    async fn none_when_nobody_qualifies() {
        let mut manager = PaymasterManager::new();
        manager.register_paymaster("broken", mock(1, Err(())), None);
        manager.register_paymaster("declines", mock(2, Ok(false)), None);
        manager.register_paymaster("strict", mock(3, Ok(true)), Some(policy(1)));

        let user_op = op_to(Address::zero(), 2);
        assert!(manager.find_best_paymaster(&user_op, 1).await.is_none());
        assert!(manager
            .sponsor_user_operation(&user_op, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn policy_failure_moves_to_next_paymaster() {
        let mut manager = PaymasterManager::new();
        manager.register_paymaster("cheap", mock(1, Ok(true)), Some(policy(10)));
        manager.register_paymaster("generous", mock(2, Ok(true)), Some(policy(1_000)));

        let selected = manager
            .find_best_paymaster(&op_to(Address::zero(), 100), 1)
            .await
            .unwrap();
        assert_eq!(selected.id, "generous");
    }

    #[tokio::test]
    async fn reregistering_keeps_position() {
        let mut manager = PaymasterManager::new();
        manager.register_paymaster("a", mock(1, Ok(false)), None);
        manager.register_paymaster("b", mock(2, Ok(true)), None);
        manager.register_paymaster("a", mock(3, Ok(true)), None);

        assert_eq!(manager.paymaster_ids(), vec!["a", "b"]);
        let selected = manager
            .find_best_paymaster(&UserOperation::default(), 1)
            .await
            .unwrap();
        assert_eq!(selected.id, "a");

        assert!(manager.unregister_paymaster("a"));
        assert!(!manager.unregister_paymaster("a"));
        assert_eq!(manager.paymaster_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn sponsors_through_selected_paymaster() {
        let mut paymaster = MockPaymaster::new();
        paymaster
            .expect_address()
            .return_const(Address::from_low_u64_be(9));
        paymaster
            .expect_can_sponsor()
            .returning(|_, _, _| Ok(CanSponsorResponse::approved()));
        paymaster.expect_sponsor().times(1).returning(|op, _| {
            Ok(SponsorshipResponse {
                paymaster_and_data: Bytes::from(vec![9u8; 20]),
                pre_verification_gas: op.pre_verification_gas,
                verification_gas_limit: op.verification_gas_limit,
                call_gas_limit: op.call_gas_limit,
            })
        });

        let mut manager = PaymasterManager::new();
        manager.register_paymaster("only", Arc::new(paymaster), None);

        let (id, response) = manager
            .sponsor_user_operation(&UserOperation::default(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "only");
        assert_eq!(response.paymaster_and_data.len(), 20);
    }

    #[test]
    fn fee_above_limit_always_rejected() {
        let target = Address::repeat_byte(0x42);
        let mut policy = policy(100);
        policy.allowed_targets = Some(vec![target]);

        assert!(check_policy_compliance(&op_to(target, 100), &policy));
        assert!(!check_policy_compliance(&op_to(target, 101), &policy));

        policy.allowed_targets = None;
        assert!(!check_policy_compliance(&op_to(target, 101), &policy));
    }

    #[test]
    fn allow_list_matches_leading_bytes() {
        let allowed = Address::repeat_byte(0x42);
        let mut policy = policy(100);
        policy.allowed_targets = Some(vec![allowed]);

        assert!(check_policy_compliance(&op_to(allowed, 1), &policy));
        assert!(!check_policy_compliance(&op_to(Address::repeat_byte(0x43), 1), &policy));
        // too short to carry a target
        let short = UserOperation {
            call_data: Bytes::from(vec![0x42; 4]),
            ..Default::default()
        };
        assert!(!check_policy_compliance(&short, &policy));

        policy.allowed_targets = Some(vec![]);
        assert!(check_policy_compliance(&short, &policy));
    }

    #[test]
    fn block_list_rejects_target() {
        let blocked = Address::repeat_byte(0x66);
        let mut policy = policy(100);
        policy.blocked_targets = Some(vec![blocked]);

        assert!(!check_policy_compliance(&op_to(blocked, 1), &policy));
        assert!(check_policy_compliance(&op_to(Address::repeat_byte(0x67), 1), &policy));
        assert!(check_policy_compliance(&UserOperation::default(), &policy));
    }

    #[test]
    fn rate_window_fields_are_not_enforced() {
        let mut policy = policy(100);
        policy.max_operations_per_time_window = 0;
        policy.require_whitelist = true;
        assert!(check_policy_compliance(&op_to(Address::zero(), 1), &policy));
    }
}
