use proptest::prelude::*;
use queue_reconciler::constants::DEFAULT_EXCLUDED_REQUIREMENT_TYPES;

/// Requirement types that never block completion, in mixed case
pub fn excluded_type_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(DEFAULT_EXCLUDED_REQUIREMENT_TYPES.to_vec()),
        any::<bool>(),
    )
        .prop_map(|(requirement_type, lowercase)| {
            if lowercase {
                requirement_type.to_lowercase()
            } else {
                requirement_type.to_string()
            }
        })
}

/// Requirement types that are actionable
pub fn actionable_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "ID_DOCUMENT",
        "PROOF_OF_ADDRESS",
        "BANK_STATEMENT",
        "PAYSLIP",
        "FINANCE_AGREEMENT",
    ])
    .prop_map(str::to_string)
}

/// Requirement statuses, with `PENDING` in both cases
pub fn status_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["PENDING", "pending", "COMPLETED", "REJECTED"]).prop_map(str::to_string)
}
