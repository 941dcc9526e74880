/// 客户端订单ID生成器
///
/// 为策略生成唯一且可识别的 clientOid，满足交易所
/// 最长64字符、字母数字的限制。
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct ClientOidGenerator {
    strategy_code: String,
    sequence: AtomicU32,
}

impl ClientOidGenerator {
    pub fn new(strategy_name: &str) -> Self {
        Self {
            strategy_code: Self::strategy_code(strategy_name),
            sequence: AtomicU32::new(0),
        }
    }

    /// 生成订单ID: [策略代码][MMDDHHMM][序列号]
    pub fn generate(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        format!(
            "{}{}{:04}",
            self.strategy_code,
            now.format("%m%d%H%M"),
            seq % 10000
        )
    }

    fn strategy_code(strategy_name: &str) -> String {
        match strategy_name {
            "scalping" => "SCP".to_string(),
            "grid" => "GRD".to_string(),
            _ => strategy_name
                .split('_')
                .map(|w| w.chars().next().unwrap_or('X'))
                .collect::<String>()
                .to_uppercase()
                .chars()
                .take(3)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_generation() {
        let gen = ClientOidGenerator::new("scalping");
        let id1 = gen.generate();
        let id2 = gen.generate();

        println!("Generated OID 1: {}", id1);
        println!("Generated OID 2: {}", id2);

        assert_ne!(id1, id2);
        assert!(id1.starts_with("SCP"));
        assert!(id1.len() <= 64);
        assert!(id1.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_grid_code() {
        let gen = ClientOidGenerator::new("grid");
        assert!(gen.generate().starts_with("GRD"));
    }
}
