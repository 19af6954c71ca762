/*!
# Harbor Lighthouse DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant les tests de l'agent avec:
- Stub HTTP du service d'ingestion (enregistrement + statuts scriptés)
- Harness d'assertions sur les requêtes reçues
- Vérification de forme des payloads raw/cargo
*/

pub mod ingest_stub;
pub mod test_utils;

pub use ingest_stub::{IngestStub, RecordedRequest};
pub use test_utils::{check_cargo_sample, check_timestamp, TestHarness};
