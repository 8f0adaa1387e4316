//! Property tests for ticker normalization.
//!
//! Uses proptest to verify:
//! 1. Normalization is idempotent
//! 2. Case, whitespace and an existing suffix never change the result
//! 3. Every accepted ticker ends with the configured suffix
//! 4. Bases outside the pattern are always rejected

use aurum_core::config::TickerConfig;
use aurum_core::{Ticker, TickerValidator};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_valid_base() -> impl Strategy<Value = String> {
    "[A-Z]{2,6}[0-9]{1,2}"
}

fn arb_padding() -> impl Strategy<Value = String> {
    "[ \t]{0,3}"
}

fn validator() -> TickerValidator {
    TickerValidator::new(&TickerConfig::default()).unwrap()
}

proptest! {
    #[test]
    fn normalization_is_idempotent(base in arb_valid_base()) {
        let v = validator();
        let once = v.normalize(&base).unwrap();
        let twice = v.normalize(once.as_str()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn case_padding_and_suffix_are_irrelevant(
        base in arb_valid_base(),
        left in arb_padding(),
        right in arb_padding(),
        with_suffix in any::<bool>(),
    ) {
        let v = validator();
        let mut raw = format!("{left}{}{right}", base.to_lowercase());
        if with_suffix {
            raw = format!("{left}{}.sa{right}", base.to_lowercase());
        }
        let normalized = v.normalize(&raw).unwrap();
        prop_assert_eq!(normalized.as_str(), format!("{base}.SA"));
        prop_assert_eq!(normalized.base(), base.as_str());
    }

    #[test]
    fn accepted_tickers_carry_the_suffix(base in arb_valid_base()) {
        let t = Ticker::parse(&base, &TickerConfig::default()).unwrap();
        prop_assert!(t.as_str().ends_with(".SA"));
    }

    #[test]
    fn digitless_bases_are_rejected(base in "[A-Z]{1,8}") {
        prop_assert!(validator().normalize(&base).is_err());
    }

    #[test]
    fn too_many_digits_are_rejected(base in "[A-Z]{2,6}[0-9]{3,5}") {
        prop_assert!(validator().normalize(&base).is_err());
    }
}
