//! ODIN Wire Messages
//!
//! Message codes, field tags and the text encoding of outbound requests.
//!
//! Every message is a `|`-separated list of `tag=value` pairs. Requests start
//! with the protocol version, message code, message type and local time:
//!
//! ```text
//! 63=FT3.0|64=206|65=84|66=10:15:00|4=3|200=0|1=1$7=22|230=1
//! ```

use chrono::{Local, NaiveTime};

pub use crate::domain::control::{code, mode_code};

use crate::domain::control::{ControlAction, ControlMessage};
use crate::domain::subscription::SubscriptionMode;

// =============================================================================
// Constants
// =============================================================================

/// Protocol version sent in tag 63.
pub const PROTOCOL_VERSION: &str = "FT3.0";

/// Literal that introduces a binary block inside a message.
pub const BINARY_BLOCK_MARKER: &[u8] = b"|50=";

/// Field separator.
pub const FIELD_SEPARATOR: char = '|';

/// Message types (tag 65).
pub mod msg_type {
    /// Login.
    pub const LOGIN: u32 = 74;
    /// Request.
    pub const REQUEST: u32 = 84;
}

/// Field tags, named after the field they carry.
#[allow(missing_docs)]
pub mod tag {
    pub const REQUEST_ID: u32 = 4;
    pub const SEGMENT: u32 = 1;
    pub const BUY_QUANTITY: u32 = 2;
    pub const BUY_PRICE: u32 = 3;
    pub const SELL_QUANTITY: u32 = 5;
    pub const SELL_PRICE: u32 = 6;
    pub const TOKEN: u32 = 7;
    pub const LTP: u32 = 8;
    pub const STATUS: u32 = 9;
    pub const REASON: u32 = 10;
    pub const NATIVE_TOUCHLINE: u32 = 49;
    pub const VERSION: u32 = 63;
    pub const MESSAGE_CODE: u32 = 64;
    pub const MESSAGE_TYPE: u32 = 65;
    pub const TIME: u32 = 66;
    pub const USER_ID: u32 = 67;
    pub const PASSWORD: u32 = 68;
    pub const LAST_TRADE_TIME: u32 = 73;
    pub const LAST_UPDATE_TIME: u32 = 74;
    pub const OPEN: u32 = 75;
    pub const CLOSE: u32 = 76;
    pub const HIGH: u32 = 77;
    pub const LOW: u32 = 78;
    pub const INDICATIVE_CLOSE: u32 = 88;
    pub const LTP_CHANGE_ONLY: u32 = 200;
    pub const ACTION: u32 = 230;
    pub const PREVIOUS_CLOSE: u32 = 250;
    pub const DECIMAL_LOCATOR: u32 = 399;
    pub const KEY_AUTH: u32 = 401;
}

/// Value of tag 230 for subscribe / pause.
const ACTION_ON: u8 = 1;

/// Value of tag 230 for unsubscribe / resume.
const ACTION_OFF: u8 = 2;

// =============================================================================
// Helpers
// =============================================================================

/// Current local wall-clock time, as sent in tag 66.
#[must_use]
pub fn local_time() -> NaiveTime {
    Local::now().time()
}

fn header(message_code: u32, message_type: u32, time: NaiveTime) -> String {
    format!(
        "{}={PROTOCOL_VERSION}|{}={message_code}|{}={message_type}|{}={}|",
        tag::VERSION,
        tag::MESSAGE_CODE,
        tag::MESSAGE_TYPE,
        tag::TIME,
        time.format("%H:%M:%S"),
    )
}

// =============================================================================
// Control Encoding
// =============================================================================

/// Encode a control request as message text.
#[must_use]
pub fn encode_control(msg: &ControlMessage, time: NaiveTime) -> String {
    let mut out = header(msg.message_code(), msg_type::REQUEST, time);
    out.push_str(&format!("{}={}|", tag::REQUEST_ID, msg.request_id));

    let action = match msg.action {
        ControlAction::Subscribe => ACTION_ON,
        ControlAction::Unsubscribe => ACTION_OFF,
        ControlAction::PauseResume if msg.is_pause => ACTION_ON,
        ControlAction::PauseResume => ACTION_OFF,
    };

    match msg.mode {
        Some(SubscriptionMode::Touchline) => {
            if msg.action == ControlAction::Subscribe {
                if msg.touchline.native {
                    out.push_str(&format!("{}=1|", tag::NATIVE_TOUCHLINE));
                }
                out.push_str(&format!(
                    "{}={}|",
                    tag::LTP_CHANGE_ONLY,
                    u8::from(msg.touchline.ltp_change_only)
                ));
            }
            push_joined_scrips(&mut out, msg);
        }
        Some(SubscriptionMode::Ltp) => push_joined_scrips(&mut out, msg),
        Some(SubscriptionMode::BestFive) => {
            for scrip in &msg.scrips {
                out.push_str(&format!(
                    "{}={}|{}={}|",
                    tag::SEGMENT,
                    scrip.segment,
                    tag::TOKEN,
                    scrip.token
                ));
            }
        }
        None => {}
    }

    out.push_str(&format!("{}={action}", tag::ACTION));
    out
}

/// Touchline and LTP requests carry `1=<seg>$7=<tok>|` per scrip.
fn push_joined_scrips(out: &mut String, msg: &ControlMessage) {
    for scrip in &msg.scrips {
        out.push_str(&format!(
            "{}={}${}={}|",
            tag::SEGMENT,
            scrip.segment,
            tag::TOKEN,
            scrip.token
        ));
    }
}

// =============================================================================
// Login
// =============================================================================

/// Login request sent when the transport opens.
#[derive(Clone)]
pub struct LoginRequest {
    /// Account user id.
    pub user_id: String,
    /// Optional API key.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("user_id", &self.user_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl LoginRequest {
    /// Encode as message text.
    #[must_use]
    pub fn encode(&self, time: NaiveTime) -> String {
        let mut out = header(code::LOGIN, msg_type::LOGIN, time);
        out.push_str(&format!("{}={}|", tag::USER_ID, self.user_id));

        match self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => out.push_str(&format!("{}={key}|{}=2", tag::PASSWORD, tag::KEY_AUTH)),
            None => out.push_str(&format!("{}=", tag::PASSWORD)),
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control::{RequestId, TouchlineOptions};
    use crate::domain::streaming::Scrip;

    fn at() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).unwrap()
    }

    fn scrips() -> Vec<Scrip> {
        vec![Scrip::new(1, 22), Scrip::new(1, 2885)]
    }

    #[test]
    fn touchline_subscribe_with_options() {
        let msg = ControlMessage::subscribe(
            RequestId(3),
            SubscriptionMode::Touchline,
            scrips(),
            TouchlineOptions {
                native: true,
                ltp_change_only: true,
            },
        );

        assert_eq!(
            encode_control(&msg, at()),
            "63=FT3.0|64=206|65=84|66=09:15:00|4=3|49=1|200=1|1=1$7=22|1=1$7=2885|230=1"
        );
    }

    #[test]
    fn touchline_unsubscribe_omits_options() {
        let msg = ControlMessage::unsubscribe(RequestId(4), SubscriptionMode::Touchline, scrips());

        assert_eq!(
            encode_control(&msg, at()),
            "63=FT3.0|64=206|65=84|66=09:15:00|4=4|1=1$7=22|1=1$7=2885|230=2"
        );
    }

    #[test]
    fn ltp_subscribe() {
        let msg = ControlMessage::subscribe(
            RequestId(1),
            SubscriptionMode::Ltp,
            vec![Scrip::new(1, 22)],
            TouchlineOptions::default(),
        );

        assert_eq!(
            encode_control(&msg, at()),
            "63=FT3.0|64=347|65=84|66=09:15:00|4=1|1=1$7=22|230=1"
        );
    }

    #[test]
    fn best_five_uses_separate_fields() {
        let msg = ControlMessage::unsubscribe(RequestId(9), SubscriptionMode::BestFive, scrips());

        assert_eq!(
            encode_control(&msg, at()),
            "63=FT3.0|64=127|65=84|66=09:15:00|4=9|1=1|7=22|1=1|7=2885|230=2"
        );
    }

    #[test]
    fn pause_and_resume() {
        let pause = ControlMessage::pause_resume(RequestId(5), true);
        let resume = ControlMessage::pause_resume(RequestId(6), false);

        assert_eq!(
            encode_control(&pause, at()),
            "63=FT3.0|64=106|65=84|66=09:15:00|4=5|230=1"
        );
        assert!(encode_control(&resume, at()).ends_with("4=6|230=2"));
    }

    #[test]
    fn login_with_and_without_key() {
        let mut login = LoginRequest {
            user_id: "TRADER1".to_string(),
            api_key: None,
        };
        assert_eq!(
            login.encode(at()),
            "63=FT3.0|64=101|65=74|66=09:15:00|67=TRADER1|68="
        );

        login.api_key = Some("secret".to_string());
        assert_eq!(
            login.encode(at()),
            "63=FT3.0|64=101|65=74|66=09:15:00|67=TRADER1|68=secret|401=2"
        );
        assert!(!format!("{login:?}").contains("secret"));
    }

    #[test]
    fn blank_key_is_sent_as_absent() {
        let login = LoginRequest {
            user_id: "TRADER1".to_string(),
            api_key: Some("   ".to_string()),
        };
        assert_eq!(
            login.encode(at()),
            "63=FT3.0|64=101|65=74|66=09:15:00|67=TRADER1|68="
        );
    }
}
