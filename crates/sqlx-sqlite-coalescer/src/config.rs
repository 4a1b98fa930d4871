use serde::{Deserialize, Serialize};

/// Configuration for a [`DatabaseWrapper`](crate::DatabaseWrapper).
///
/// Note: `Default` and `#[serde(default)]` share the same defaults so a partial config
/// deserializes the same way `Default::default()` builds one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
   /// Commit interval armed right after opening, in milliseconds. `0` leaves coalescing off
   /// and every write outside a scope autocommits.
   pub coalescing_interval_ms: u64,
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = CoalescerConfig::default();
      assert_eq!(config.coalescing_interval_ms, 0);
   }

   #[test]
   fn test_partial_json() {
      let config: CoalescerConfig = serde_json::from_str("{}").unwrap();
      assert_eq!(config, CoalescerConfig::default());

      let config: CoalescerConfig =
         serde_json::from_str(r#"{"coalescing_interval_ms": 50}"#).unwrap();
      assert_eq!(config.coalescing_interval_ms, 50);
   }
}
