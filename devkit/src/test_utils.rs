/*!
Test Harness pour l'agent Harbor Lighthouse

Facilite l'écriture de tests de livraison avec:
- Démarrage automatique du stub d'ingestion
- Expectations sur le nombre de requêtes par chemin
- Assertions sur la forme des documents raw et des échantillons cargo
*/

use crate::ingest_stub::IngestStub;
use serde_json::Value;
use std::collections::HashMap;
use anyhow::Result;

/// Harness de test complet autour d'un `IngestStub`
pub struct TestHarness {
    pub stub: IngestStub,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    path: String,
    expected_count: usize,
}

impl TestHarness {
    /// Crée un harness avec un stub démarré
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        Ok(Self {
            stub: IngestStub::start().await?,
            expectations: Vec::new(),
        })
    }

    /// On s'attend à recevoir exactement N requêtes sur un chemin
    pub fn expect_requests(&mut self, path: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            path: path.to_string(),
            expected_count: count,
        });
        self
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.stub.requests_to(&expectation.path).len();

            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for path '{}': expected {} requests, got {}",
                    expectation.path, expectation.expected_count, actual_count
                );
            }

            log::info!("✅ Path '{}': {} requests as expected", expectation.path, actual_count);
        }
        Ok(())
    }

    /// Assert qu'un champ existe dans le dernier corps reçu sur un chemin
    pub fn assert_field_exists(&self, path: &str, field: &str) -> Result<()> {
        match self.last_body(path) {
            Some(body) if body.get(field).is_some() => Ok(()),
            Some(_) => anyhow::bail!("Field '{}' not found in latest body on {}", field, path),
            None => anyhow::bail!("No request received on {}", path),
        }
    }

    /// Assert qu'un champ a une valeur spécifique
    pub fn assert_field_equals(&self, path: &str, field: &str, expected: &Value) -> Result<()> {
        let body = self
            .last_body(path)
            .ok_or_else(|| anyhow::anyhow!("No request received on {}", path))?;

        match body.get(field) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field, expected, actual
            ),
            None => anyhow::bail!("Field '{}' not found for comparison in {}", field, path),
        }
    }

    /// Tous les échantillons cargo reçus sur un chemin, dans l'ordre d'arrivée
    pub fn cargo_samples(&self, path: &str) -> Result<Vec<Value>> {
        let mut samples = Vec::new();
        for request in self.stub.requests_to(path) {
            let batch = request
                .body
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Batch body on {} is not a JSON array", path))?;
            for sample in batch {
                check_cargo_sample(sample)?;
                samples.push(sample.clone());
            }
        }
        Ok(samples)
    }

    fn last_body(&self, path: &str) -> Option<Value> {
        self.stub.requests_to(path).last().map(|r| r.body.clone())
    }

    /// Stats sur les requêtes reçues
    pub fn get_stats(&self) -> TestStats {
        let requests = self.stub.requests();
        let mut path_counts = HashMap::new();

        for request in &requests {
            *path_counts.entry(request.path.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_requests: requests.len(),
            path_counts,
        }
    }
}

/// Vérifie la forme d'un échantillon cargo: {time, ship_id, cargo_id, value}
pub fn check_cargo_sample(sample: &Value) -> Result<()> {
    let obj = sample
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Cargo sample is not an object: {}", sample))?;

    for key in ["time", "ship_id", "cargo_id", "value"] {
        if !obj.contains_key(key) {
            anyhow::bail!("Cargo sample missing '{}': {}", key, sample);
        }
    }
    check_timestamp(&obj["time"])?;
    if obj.len() != 4 {
        anyhow::bail!("Cargo sample has unexpected fields: {}", sample);
    }
    Ok(())
}

/// Vérifie qu'une valeur est un horodatage RFC3339 UTC
pub fn check_timestamp(value: &Value) -> Result<()> {
    let text = value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Timestamp is not a string: {}", value))?;
    let parsed = chrono::DateTime::parse_from_rfc3339(text)?;
    if parsed.offset().local_minus_utc() != 0 {
        anyhow::bail!("Timestamp is not UTC: {}", text);
    }
    Ok(())
}

#[derive(Debug)]
pub struct TestStats {
    pub total_requests: usize,
    pub path_counts: HashMap<String, usize>,
}
