//! 连接标识模块 - 定义连接ID与用户ID
//! Connection Identity Module - Defines connection and user identifiers
//!
//! 两者均由传输层和认证层提供，在本库中是不透明的值。
//! Both are supplied by the transport and authentication layers and are opaque to this library.

use serde::Serialize;
use std::{borrow::Borrow, fmt};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// 创建新的标识
            /// Create a new identifier
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// 获取字符串表示
            /// Get the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// 连接ID，每个WebSocket连接唯一
    /// Connection ID, unique per WebSocket connection
    ConnectionId
);

opaque_id!(
    /// 拥有该连接的用户ID
    /// ID of the user owning the connection
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_conversions() {
        let cid = ConnectionId::from("conn-1");
        assert_eq!(cid.as_str(), "conn-1");
        assert_eq!(cid.to_string(), "conn-1");
        assert_eq!(cid, ConnectionId::new(String::from("conn-1")));

        let uid: UserId = String::from("user-9").into();
        assert_eq!(uid.as_ref(), "user-9");
    }
}
