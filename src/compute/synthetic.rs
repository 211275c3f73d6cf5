// Synthetic customer churn data

use crate::types::{CustomerFeatures, LabeledRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const INTERNET_SERVICES: [&str; 3] = ["DSL", "Fiber optic", "No"];
const PAYMENT_METHODS: [&str; 4] = [
    "Electronic check",
    "Mailed check",
    "Bank transfer",
    "Credit card",
];

/// Seeded generator for churn training data.
///
/// Churn likelihood rises with month-to-month contracts, short tenure, high
/// monthly charges, electronic-check payment and missing online security.
pub struct SyntheticGenerator {
    rng: StdRng,
    next_id: usize,
}

impl SyntheticGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
        }
    }

    /// Generates `n` labelled rows with ids `CUST_00001` onward.
    pub fn generate(&mut self, n: usize) -> Vec<LabeledRecord> {
        (0..n)
            .map(|_| {
                let (customer, churn) = self.customer();
                LabeledRecord {
                    customer_id: customer.customer_id.clone(),
                    features: customer.to_record(),
                    churn,
                }
            })
            .collect()
    }

    /// Generates one customer and its churn label.
    pub fn customer(&mut self) -> (CustomerFeatures, bool) {
        let customer_id = format!("CUST_{:05}", self.next_id);
        self.next_id += 1;

        let rng = &mut self.rng;

        let age = rng.gen_range(18..80);
        let gender = if rng.gen() { "Male" } else { "Female" };
        let partner: bool = rng.gen();
        let dependents = partner && rng.gen();

        let tenure = rng.gen_range(0..72);
        let phone_service: bool = rng.gen();
        let multiple_lines = phone_service && rng.gen();

        let internet_service = *INTERNET_SERVICES.choose(rng).unwrap_or(&"No");
        let has_internet = internet_service != "No";
        let mut addon = || has_internet && rng.gen::<bool>();
        let online_security = addon();
        let online_backup = addon();
        let device_protection = addon();
        let tech_support = addon();
        let streaming_tv = addon();
        let streaming_movies = addon();

        let contract_type = *crate::types::CONTRACT_TYPES
            .choose(rng)
            .unwrap_or(&"Month-to-month");
        let paperless_billing: bool = rng.gen();
        let payment_method = *PAYMENT_METHODS.choose(rng).unwrap_or(&"Mailed check");

        let mut base_monthly: f64 = if has_internet { 30.0 } else { 20.0 };
        if internet_service == "Fiber optic" {
            base_monthly += 20.0;
        }
        if multiple_lines {
            base_monthly += 10.0;
        }
        if streaming_tv || streaming_movies {
            base_monthly += 10.0;
        }

        let monthly_charges = (base_monthly + normal(rng, 5.0)).clamp(20.0, 120.0);
        let total_charges = (monthly_charges * tenure as f64 + normal(rng, 100.0)).max(0.0);

        let mut churn_prob = 0.1;
        if contract_type == "Month-to-month" {
            churn_prob += 0.3;
        }
        if tenure < 12 {
            churn_prob += 0.2;
        }
        if monthly_charges > 70.0 {
            churn_prob += 0.15;
        }
        if payment_method == "Electronic check" {
            churn_prob += 0.1;
        }
        if !online_security && has_internet {
            churn_prob += 0.05;
        }
        let churn = rng.gen::<f64>() < churn_prob;

        let customer = CustomerFeatures {
            customer_id,
            age,
            tenure,
            monthly_charges: round2(monthly_charges),
            total_charges: round2(total_charges),
            contract_type: contract_type.to_string(),
            payment_method: payment_method.to_string(),
            paperless_billing,
            gender: gender.to_string(),
            partner,
            dependents,
            phone_service,
            multiple_lines,
            internet_service: internet_service.to_string(),
            online_security,
            online_backup,
            device_protection,
            tech_support,
            streaming_tv,
            streaming_movies,
        };

        (customer, churn)
    }
}

/// Zero-mean normal draw (Box-Muller).
fn normal(rng: &mut StdRng, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_seeded() {
        let a = SyntheticGenerator::new(42).generate(50);
        let b = SyntheticGenerator::new(42).generate(50);
        assert_eq!(a, b);

        let c = SyntheticGenerator::new(7).generate(50);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rows_are_valid_customers() {
        let mut generator = SyntheticGenerator::new(1);
        for _ in 0..200 {
            let (customer, _) = generator.customer();
            customer.validate().unwrap();
            assert!((20.0..=120.0).contains(&customer.monthly_charges));
            assert!(customer.total_charges >= 0.0);
            if customer.internet_service == "No" {
                assert!(!customer.online_security && !customer.streaming_tv);
            }
            if !customer.partner {
                assert!(!customer.dependents);
            }
        }
    }

    #[test]
    fn test_ids_and_both_classes() {
        let rows = SyntheticGenerator::new(42).generate(500);
        assert_eq!(rows[0].customer_id, "CUST_00001");
        assert_eq!(rows[499].customer_id, "CUST_00500");

        let churned = rows.iter().filter(|r| r.churn).count();
        assert!(churned > 50 && churned < 450, "churned = {}", churned);
    }
}
