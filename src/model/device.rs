use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Locked,
    Offline,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Active
    }
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Locked => "locked",
            DeviceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "locked" => Ok(DeviceStatus::Locked),
            "offline" => Ok(DeviceStatus::Offline),
            other => Err(format!(
                "invalid status '{other}', expected one of: active, inactive, locked, offline"
            )),
        }
    }
}

/// A device as tracked by the registry. Timestamps are RFC 3339 UTC on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_lock_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlock_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

impl DeviceRecord {
    /// Build a fresh record: unlocked, active, all timestamps at `now`.
    pub fn from_registration(id: String, data: NewDevice, now: DateTime<Utc>) -> Self {
        Self {
            id,
            imei: data.imei,
            android_id: data.android_id,
            serial_number: data.serial_number,
            device_id: data.device_id,
            mac_address: data.mac_address,
            device_name: data.device_name,
            model: data.model,
            manufacturer: data.manufacturer,
            os_version: data.os_version,
            is_locked: false,
            status: DeviceStatus::Active,
            last_lock_time: None,
            last_unlock_time: None,
            fcm_token: data.fcm_token,
            last_seen: now,
            registered_at: now,
            updated_at: now,
            custom_data: data.custom_data,
        }
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.imei.as_deref() == Some(identifier) || self.android_id.as_deref() == Some(identifier)
    }

    /// Label used in logs: imei, else android id, else the record id.
    pub fn label(&self) -> &str {
        self.imei
            .as_deref()
            .or(self.android_id.as_deref())
            .unwrap_or(&self.id)
    }

    /// Merge descriptive registration fields into an existing record.
    /// State fields are left alone.
    pub fn merge_registration(&mut self, data: NewDevice) {
        fn keep(target: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *target = value;
            }
        }

        keep(&mut self.imei, data.imei);
        keep(&mut self.android_id, data.android_id);
        keep(&mut self.serial_number, data.serial_number);
        keep(&mut self.device_id, data.device_id);
        keep(&mut self.mac_address, data.mac_address);
        keep(&mut self.device_name, data.device_name);
        keep(&mut self.model, data.model);
        keep(&mut self.manufacturer, data.manufacturer);
        keep(&mut self.os_version, data.os_version);
        keep(&mut self.fcm_token, data.fcm_token);
        if data.custom_data.is_some() {
            self.custom_data = data.custom_data;
        }
    }

    /// Apply a partial update. Keeps `is_locked` and `status` in agreement.
    pub fn apply_update(&mut self, update: DeviceUpdate) {
        fn keep(target: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *target = value;
            }
        }

        keep(&mut self.fcm_token, clean(update.fcm_token));
        keep(&mut self.device_name, clean(update.device_name));
        keep(&mut self.model, clean(update.model));
        keep(&mut self.manufacturer, clean(update.manufacturer));
        keep(&mut self.os_version, clean(update.os_version));
        keep(&mut self.serial_number, clean(update.serial_number));
        keep(&mut self.mac_address, clean(update.mac_address));

        if update.last_lock_time.is_some() {
            self.last_lock_time = update.last_lock_time;
        }
        if update.last_unlock_time.is_some() {
            self.last_unlock_time = update.last_unlock_time;
        }
        if update.custom_data.is_some() {
            self.custom_data = update.custom_data;
        }

        match (update.status, update.is_locked) {
            (Some(status), _) => {
                self.status = status;
                self.is_locked = status == DeviceStatus::Locked;
            }
            (None, Some(locked)) => {
                self.is_locked = locked;
                self.status = if locked {
                    DeviceStatus::Locked
                } else {
                    DeviceStatus::Active
                };
            }
            (None, None) => {}
        }
    }
}

/// Registration payload. Blank strings are treated as absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    #[serde(default)]
    pub imei: Option<String>,
    #[serde(default)]
    pub android_id: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub custom_data: Option<serde_json::Value>,
}

impl NewDevice {
    pub fn normalized(self) -> Self {
        Self {
            imei: clean(self.imei),
            android_id: clean(self.android_id),
            serial_number: clean(self.serial_number),
            device_id: clean(self.device_id),
            mac_address: clean(self.mac_address),
            device_name: clean(self.device_name),
            model: clean(self.model),
            manufacturer: clean(self.manufacturer),
            os_version: clean(self.os_version),
            fcm_token: clean(self.fcm_token),
            custom_data: self.custom_data,
        }
    }

    pub fn has_identifier(&self) -> bool {
        self.imei.is_some() || self.android_id.is_some()
    }
}

/// Partial update accepted by `update_device_status`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub is_locked: Option<bool>,
    #[serde(default)]
    pub status: Option<DeviceStatus>,
    #[serde(default)]
    pub last_lock_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_unlock_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub custom_data: Option<serde_json::Value>,
}

impl DeviceUpdate {
    pub fn fcm_token(token: impl Into<String>) -> Self {
        Self {
            fcm_token: Some(token.into()),
            ..Self::default()
        }
    }
}

/// Identifier pair carried by most device endpoints; `imei` wins when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    #[serde(default)]
    pub imei: Option<String>,
    #[serde(default)]
    pub android_id: Option<String>,
}

impl DeviceIdentity {
    pub fn identifier(&self) -> Option<&str> {
        self.imei
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.android_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
    }
}

/// Read-only status summary served by the IMEI lookup endpoint. Missing
/// descriptive fields are reported as `"Unknown"`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusView {
    pub imei: String,
    pub source: &'static str,
    pub device_name: String,
    pub model: String,
    pub manufacturer: String,
    pub os_version: String,
    pub is_locked: bool,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_lock_time: Option<DateTime<Utc>>,
    pub last_unlock_time: Option<DateTime<Utc>>,
    pub serial_number: Option<String>,
    pub device_id: Option<String>,
    pub android_id: Option<String>,
    pub mac_address: Option<String>,
    pub custom_data: serde_json::Value,
}

impl From<DeviceRecord> for DeviceStatusView {
    fn from(record: DeviceRecord) -> Self {
        fn or_unknown(value: Option<String>) -> String {
            value.unwrap_or_else(|| "Unknown".to_string())
        }

        Self {
            imei: record.imei.unwrap_or_default(),
            source: "custom_database",
            device_name: or_unknown(record.device_name),
            model: or_unknown(record.model),
            manufacturer: or_unknown(record.manufacturer),
            os_version: or_unknown(record.os_version),
            is_locked: record.is_locked,
            status: record.status,
            registered_at: record.registered_at,
            last_seen: record.last_seen,
            last_lock_time: record.last_lock_time,
            last_unlock_time: record.last_unlock_time,
            serial_number: record.serial_number,
            device_id: record.device_id,
            android_id: record.android_id,
            mac_address: record.mac_address,
            custom_data: record
                .custom_data
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeviceRecord {
        DeviceRecord::from_registration(
            "dev-1".into(),
            NewDevice {
                imei: Some("356938035643809".into()),
                android_id: Some("a1b2c3".into()),
                ..NewDevice::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn status_update_keeps_lock_flag_consistent() {
        let mut rec = record();
        rec.apply_update(DeviceUpdate {
            status: Some(DeviceStatus::Locked),
            ..DeviceUpdate::default()
        });
        assert!(rec.is_locked);

        rec.apply_update(DeviceUpdate {
            is_locked: Some(false),
            ..DeviceUpdate::default()
        });
        assert_eq!(rec.status, DeviceStatus::Active);
        assert!(!rec.is_locked);
    }

    #[test]
    fn blank_update_strings_keep_existing_values() {
        let mut rec = record();
        rec.fcm_token = Some("tok-1".into());
        rec.apply_update(DeviceUpdate {
            fcm_token: Some("".into()),
            model: Some("  Pixel 8 ".into()),
            manufacturer: Some("   ".into()),
            ..DeviceUpdate::default()
        });
        assert_eq!(rec.fcm_token.as_deref(), Some("tok-1"));
        assert_eq!(rec.model.as_deref(), Some("Pixel 8"));
        assert_eq!(rec.manufacturer, None);
    }

    #[test]
    fn blank_identifiers_are_dropped() {
        let data = NewDevice {
            imei: Some("   ".into()),
            android_id: Some(" abc ".into()),
            ..NewDevice::default()
        }
        .normalized();
        assert_eq!(data.imei, None);
        assert_eq!(data.android_id.as_deref(), Some("abc"));
        assert!(data.has_identifier());
    }

    #[test]
    fn identity_prefers_imei() {
        let identity = DeviceIdentity {
            imei: Some("".into()),
            android_id: Some("droid".into()),
        };
        assert_eq!(identity.identifier(), Some("droid"));

        let identity = DeviceIdentity {
            imei: Some("123".into()),
            android_id: Some("droid".into()),
        };
        assert_eq!(identity.identifier(), Some("123"));
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["androidId"], "a1b2c3");
        assert_eq!(json["isLocked"], false);
        assert_eq!(json["status"], "active");
        assert!(json.get("fcmToken").is_none());
    }

    #[test]
    fn status_view_fills_unknowns() {
        let view = DeviceStatusView::from(record());
        assert_eq!(view.model, "Unknown");
        assert_eq!(view.source, "custom_database");
        assert_eq!(view.imei, "356938035643809");
        assert!(view.custom_data.as_object().unwrap().is_empty());
    }
}
