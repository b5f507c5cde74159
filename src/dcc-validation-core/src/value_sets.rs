//! Value sets (code lists) and their projection into rule data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One code list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetItem {
    /// Code as it appears in certificates.
    pub key: String,
    /// Human readable label.
    #[serde(default)]
    pub display_text: String,
}

/// A code list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSet {
    /// Entries of the list.
    #[serde(default)]
    pub items: Vec<ValueSetItem>,
}

impl ValueSet {
    /// Codes of all entries, in delivery order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|item| item.key.clone()).collect()
    }

    /// Display text for a code.
    #[must_use]
    pub fn display_text(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.display_text.as_str())
    }
}

/// The value-set package as delivered by the distribution service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSets {
    /// Vaccine or prophylaxis.
    #[serde(default)]
    pub vp: ValueSet,
    /// Vaccine medicinal product.
    #[serde(default)]
    pub mp: ValueSet,
    /// Marketing authorisation holder.
    #[serde(default)]
    pub ma: ValueSet,
    /// Disease or agent targeted.
    #[serde(default)]
    pub tg: ValueSet,
    /// Test type.
    #[serde(default, rename = "tcTt")]
    pub tc_tt: ValueSet,
    /// Rapid test manufacturer and name.
    #[serde(default, rename = "tcMa")]
    pub tc_ma: ValueSet,
    /// Test result.
    #[serde(default, rename = "tcTr")]
    pub tc_tr: ValueSet,
}

/// Key under which the embedded country list is exposed.
pub const COUNTRY_CODES_KEY: &str = "country-2-codes";

impl ValueSets {
    /// Project into the `name -> [code]` dictionary rules address via
    /// `external.valueSets.<name>`.
    ///
    /// Country codes come from the embedded ISO 3166 list, not the payload.
    #[must_use]
    pub fn mapped(&self) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::with_capacity(8);
        map.insert(
            COUNTRY_CODES_KEY.to_string(),
            COUNTRY_CODES.iter().map(|c| (*c).to_string()).collect(),
        );
        map.insert("covid-19-lab-result".to_string(), self.tc_tr.keys());
        map.insert(
            "covid-19-lab-test-manufacturer-and-name".to_string(),
            self.tc_ma.keys(),
        );
        map.insert("covid-19-lab-test-type".to_string(), self.tc_tt.keys());
        map.insert("disease-agent-targeted".to_string(), self.tg.keys());
        map.insert("sct-vaccines-covid-19".to_string(), self.vp.keys());
        map.insert("vaccines-covid-19-auth-holders".to_string(), self.ma.keys());
        map.insert("vaccines-covid-19-names".to_string(), self.mp.keys());
        map
    }
}

/// ISO 3166-1 alpha-2 codes.
pub const COUNTRY_CODES: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS",
    "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM", "DO", "DZ", "EC", "EE",
    "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF",
    "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT", "JE", "JM",
    "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC",
    "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA",
    "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG",
    "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS",
    "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO",
    "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];
