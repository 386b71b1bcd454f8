//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod wallet {
    use super::*;

    pub const NAMESPACE: &str = "wallet";

    #[derive(Debug, Clone)]
    pub struct BalanceKey {
        pub user_id: String,
    }

    impl BalanceKey {
        pub fn new(user_id: impl Into<String>) -> Self {
            Self {
                user_id: user_id.into(),
            }
        }
    }

    impl fmt::Display for BalanceKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:balance:{}", VERSION, NAMESPACE, self.user_id)
        }
    }

    #[derive(Debug, Clone)]
    pub struct TransactionsKey {
        pub user_id: String,
    }

    impl TransactionsKey {
        pub fn new(user_id: impl Into<String>) -> Self {
            Self {
                user_id: user_id.into(),
            }
        }
    }

    impl fmt::Display for TransactionsKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:transactions:{}", VERSION, NAMESPACE, self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_balance_key() {
        let key = wallet::BalanceKey::new("7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a");
        assert_eq!(
            key.to_string(),
            "v1:wallet:balance:7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a"
        );
    }

    #[test]
    fn test_wallet_transactions_key() {
        let key = wallet::TransactionsKey::new("7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a");
        assert_eq!(
            key.to_string(),
            "v1:wallet:transactions:7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a"
        );
    }

}
