//! 事件总线配置
//!
//! 支持 builder 构造与 serde 反序列化；所有字段均有默认值，可只提供部分字段。
//!
use bon::Builder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUS_NAME: &str = "kordon";

/// drain 周期拿到空批次或空处理器快照时 worker 的行为
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// 回到等待状态，继续服务后续的 raise
    #[default]
    Wait,
    /// 永久退出 worker 并关闭总线，之后的 raise 全部丢弃
    Stop,
}

/// 事件总线配置
#[derive(Builder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// 日志与 span 中使用的总线名称
    #[builder(into, default = DEFAULT_BUS_NAME.to_string())]
    pub name: String,
    #[builder(default)]
    pub idle_policy: IdlePolicy,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BUS_NAME.to_string(),
            idle_policy: IdlePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default_impl() {
        assert_eq!(EventBusConfig::builder().build(), EventBusConfig::default());
    }

    #[test]
    fn builder_overrides() {
        let cfg = EventBusConfig::builder()
            .name("audit")
            .idle_policy(IdlePolicy::Stop)
            .build();
        assert_eq!(cfg.name, "audit");
        assert_eq!(cfg.idle_policy, IdlePolicy::Stop);
    }

    #[test]
    fn deserialize_partial_document() {
        let cfg: EventBusConfig = serde_json::from_str(r#"{"idle_policy":"stop"}"#).unwrap();
        assert_eq!(cfg.name, DEFAULT_BUS_NAME);
        assert_eq!(cfg.idle_policy, IdlePolicy::Stop);

        let cfg: EventBusConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, EventBusConfig::default());
    }

    #[test]
    fn unknown_idle_policy_is_rejected() {
        let res = serde_json::from_str::<EventBusConfig>(r#"{"idle_policy":"sleep"}"#);
        assert!(res.is_err());
    }
}
