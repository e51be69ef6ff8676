// =============================================================================
// Validator (C1)
// =============================================================================
//
// The sole conversion boundary between dynamically-typed inbound payloads
// and the internal Signal tagged sum (spec.md §9). Takes a free-form JSON
// map, returns either a canonical Signal or a ValidationError.
// =============================================================================

use chrono::Utc;
use serde_json::Value;

use crate::errors::ValidationError;
use crate::signal::{Confirmation, Direction, Signal, SignalEvent, SignalKind};

/// GOLD symbol aliases. The chart service and the broker do not always
/// agree on a symbol name (e.g. `XAUUSD` vs the broker's `GOLD`); this is
/// part of the same normalization boundary as the rest of the validator,
/// not a separate feature.
fn normalize_symbol(raw: &str) -> String {
    match raw.trim().to_uppercase().as_str() {
        "GOLD" | "XAUUSD" => "GOLD".to_string(),
        other => other.to_string(),
    }
}

fn field_str<'a>(raw: &'a Value, name: &str) -> Option<&'a str> {
    raw.get(name).and_then(Value::as_str)
}

/// Strict numeric coercion: accepts a JSON number or a string that parses
/// cleanly as f64. No silent truncation — a string like `"5200abc"` is
/// rejected rather than parsed up to the first non-digit.
fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub struct Validator;

impl Validator {
    /// Validate and normalize a free-form inbound payload into a canonical
    /// `Signal`. Required fields: `signal_type`, `event`, `price`.
    /// `direction` may arrive under `direction`, `side`, or `action`;
    /// required (and must be buy/sell) when `signal_type=entry_trigger`.
    /// Missing optional confidences become `None`, never `0.0`.
    pub fn validate(raw: &Value) -> Result<Signal, ValidationError> {
        let obj = raw.as_object().ok_or_else(|| ValidationError {
            field: "<root>".into(),
            reason: "payload must be a JSON object".into(),
        })?;
        let _ = obj;

        let signal_type_raw = field_str(raw, "signal_type").ok_or_else(|| ValidationError {
            field: "signal_type".into(),
            reason: "missing required field".into(),
        })?;
        let kind = match signal_type_raw.trim().to_lowercase().as_str() {
            "entry_trigger" => SignalKind::EntryTrigger,
            "structure" => SignalKind::Structure,
            other => {
                return Err(ValidationError {
                    field: "signal_type".into(),
                    reason: format!("unknown signal_type `{other}`"),
                })
            }
        };

        let event_raw = field_str(raw, "event").ok_or_else(|| ValidationError {
            field: "event".into(),
            reason: "missing required field".into(),
        })?;
        let event = SignalEvent::parse(event_raw).ok_or_else(|| ValidationError {
            field: "event".into(),
            reason: format!("unknown event `{event_raw}`"),
        })?;

        if kind == SignalKind::EntryTrigger && event != SignalEvent::PredictionSignal {
            return Err(ValidationError {
                field: "event".into(),
                reason: "entry_trigger signals must carry event=prediction_signal".into(),
            });
        }
        if kind == SignalKind::Structure && !event.is_structure_event() {
            return Err(ValidationError {
                field: "event".into(),
                reason: "structure signals cannot carry event=prediction_signal".into(),
            });
        }

        let price_val = raw.get("price").ok_or_else(|| ValidationError {
            field: "price".into(),
            reason: "missing required field".into(),
        })?;
        let price = coerce_f64(price_val).ok_or_else(|| ValidationError {
            field: "price".into(),
            reason: "could not parse as a number".into(),
        })?;

        let direction_raw = field_str(raw, "direction")
            .or_else(|| field_str(raw, "side"))
            .or_else(|| field_str(raw, "action"));
        let direction = match direction_raw {
            Some(d) => Some(Direction::parse(d).ok_or_else(|| ValidationError {
                field: "direction".into(),
                reason: format!("unknown direction `{d}`"),
            })?),
            None => None,
        };
        if kind == SignalKind::EntryTrigger && direction.is_none() {
            return Err(ValidationError {
                field: "direction".into(),
                reason: "entry_trigger signals require a direction".into(),
            });
        }

        let timeframe = raw.get("tf").and_then(coerce_i64);
        let confirmed = field_str(raw, "confirmed").map(Confirmation::parse);
        let tv_confidence = raw.get("tv_confidence").and_then(coerce_f64);
        let pattern_similarity = raw.get("pattern_similarity").and_then(coerce_f64);
        let symbol = normalize_symbol(field_str(raw, "symbol").unwrap_or("GOLD"));

        Ok(Signal {
            symbol,
            price,
            timeframe,
            direction,
            kind,
            event,
            source: field_str(raw, "source").unwrap_or("").to_string(),
            strength: field_str(raw, "strength").unwrap_or("").to_string(),
            confirmed,
            tv_confidence,
            pattern_similarity,
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_required_field() {
        let raw = json!({"event": "prediction_signal", "price": 5200.0});
        assert!(Validator::validate(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_event() {
        let raw = json!({"signal_type": "entry_trigger", "event": "mystery", "price": 1.0, "direction": "buy"});
        assert!(Validator::validate(&raw).is_err());
    }

    #[test]
    fn entry_trigger_requires_direction() {
        let raw = json!({"signal_type": "entry_trigger", "event": "prediction_signal", "price": 5200.0});
        assert!(Validator::validate(&raw).is_err());
    }

    #[test]
    fn accepts_direction_alias_side() {
        let raw = json!({"signal_type": "entry_trigger", "event": "prediction_signal", "price": 5200.0, "side": "BUY"});
        let sig = Validator::validate(&raw).unwrap();
        assert_eq!(sig.direction, Some(Direction::Buy));
    }

    #[test]
    fn normalizes_symbol_alias() {
        let raw = json!({"signal_type": "structure", "event": "liquidity_sweep", "price": 5200.0, "symbol": "xauusd"});
        let sig = Validator::validate(&raw).unwrap();
        assert_eq!(sig.symbol, "GOLD");
    }

    #[test]
    fn missing_confidence_is_null_not_zero() {
        let raw = json!({"signal_type": "structure", "event": "liquidity_sweep", "price": 5200.0});
        let sig = Validator::validate(&raw).unwrap();
        assert_eq!(sig.tv_confidence, None);
        assert_eq!(sig.pattern_similarity, None);
    }

    #[test]
    fn strict_numeric_parse_rejects_garbage_price() {
        let raw = json!({"signal_type": "structure", "event": "liquidity_sweep", "price": "5200abc"});
        assert!(Validator::validate(&raw).is_err());
    }

    #[test]
    fn structure_signal_rejects_prediction_event() {
        let raw = json!({"signal_type": "structure", "event": "prediction_signal", "price": 1.0});
        assert!(Validator::validate(&raw).is_err());
    }
}
