//! The architecture model: well-known names and layout constants of the
//! target switch.
//!
//! The back end never hard-codes an architecture name; everything it needs
//! to recognize -- match kinds, extern types and their methods, enum names,
//! parameter positions -- comes from a [`SwitchModel`] value. The default
//! value describes the single-pipeline software-switch architecture the
//! emitted JSON targets.

/// Well-known names and constants of the target architecture.
#[derive(Debug, Clone)]
pub struct SwitchModel {
    // Match kinds.
    pub exact_match: &'static str,
    pub ternary_match: &'static str,
    pub lpm_match: &'static str,
    pub range_match: &'static str,
    pub selector_match: &'static str,

    // Built-in methods on headers and stacks.
    pub is_valid: &'static str,
    pub set_valid: &'static str,
    pub set_invalid: &'static str,
    pub push_front: &'static str,
    pub pop_front: &'static str,
    pub apply_method: &'static str,
    /// Member of an apply result carrying the hit flag.
    pub apply_hit: &'static str,
    /// Member of an apply result switched over for action labels.
    pub action_run: &'static str,
    pub stack_next: &'static str,
    pub stack_last: &'static str,
    /// Synthetic field exposing header validity to ternary matches.
    pub valid_field: &'static str,

    // Packet externs.
    pub packet_in: &'static str,
    pub packet_out: &'static str,
    pub extract: &'static str,
    pub lookahead: &'static str,
    pub emit: &'static str,

    // Stateful extern types and their methods.
    pub counter: &'static str,
    pub counter_count: &'static str,
    pub meter: &'static str,
    pub meter_execute: &'static str,
    pub register: &'static str,
    pub register_read: &'static str,
    pub register_write: &'static str,
    pub direct_counter: &'static str,
    pub direct_counter_count: &'static str,
    pub direct_meter: &'static str,
    pub direct_meter_read: &'static str,
    pub action_profile: &'static str,
    pub action_selector: &'static str,
    pub checksum_unit: &'static str,
    pub checksum_get: &'static str,

    // Extern functions.
    pub clone_fn: &'static str,
    pub clone3_fn: &'static str,
    pub hash_fn: &'static str,
    pub digest_fn: &'static str,
    pub verify_fn: &'static str,
    pub resubmit_fn: &'static str,
    pub recirculate_fn: &'static str,
    pub drop_fn: &'static str,
    pub random_fn: &'static str,
    pub truncate_fn: &'static str,

    // Enum names the back end resolves members of.
    pub clone_type_enum: &'static str,
    pub clone_i2e: &'static str,
    pub clone_e2e: &'static str,
    pub meter_packets: &'static str,
    pub meter_bytes: &'static str,

    // Parameter positions.
    pub parser_headers_param: usize,
    pub parser_meta_param: usize,
    pub parser_std_meta_param: usize,
    pub control_meta_param: usize,
    pub control_std_meta_param: usize,

    // JSON object names.
    pub parser_json_name: &'static str,
    pub deparser_json_name: &'static str,
    pub ingress_json_name: &'static str,
    pub egress_json_name: &'static str,
    pub std_meta_json_name: &'static str,
    /// User-metadata fields whose header types are force-arith'ed.
    pub force_arith_fields: &'static [&'static str],

    // Limits.
    pub default_table_size: u64,
    pub max_shift_width: u32,
}

impl Default for SwitchModel {
    fn default() -> Self {
        SwitchModel {
            exact_match: "exact",
            ternary_match: "ternary",
            lpm_match: "lpm",
            range_match: "range",
            selector_match: "selector",

            is_valid: "isValid",
            set_valid: "setValid",
            set_invalid: "setInvalid",
            push_front: "push_front",
            pop_front: "pop_front",
            apply_method: "apply",
            apply_hit: "hit",
            action_run: "action_run",
            stack_next: "next",
            stack_last: "last",
            valid_field: "$valid$",

            packet_in: "packet_in",
            packet_out: "packet_out",
            extract: "extract",
            lookahead: "lookahead",
            emit: "emit",

            counter: "counter",
            counter_count: "count",
            meter: "meter",
            meter_execute: "execute_meter",
            register: "register",
            register_read: "read",
            register_write: "write",
            direct_counter: "direct_counter",
            direct_counter_count: "count",
            direct_meter: "direct_meter",
            direct_meter_read: "read",
            action_profile: "action_profile",
            action_selector: "action_selector",
            checksum_unit: "Checksum16",
            checksum_get: "get",

            clone_fn: "clone",
            clone3_fn: "clone3",
            hash_fn: "hash",
            digest_fn: "digest",
            verify_fn: "verify",
            resubmit_fn: "resubmit",
            recirculate_fn: "recirculate",
            drop_fn: "drop",
            random_fn: "random",
            truncate_fn: "truncate",

            clone_type_enum: "CloneType",
            clone_i2e: "I2E",
            clone_e2e: "E2E",
            meter_packets: "packets",
            meter_bytes: "bytes",

            parser_headers_param: 1,
            parser_meta_param: 2,
            parser_std_meta_param: 3,
            control_meta_param: 1,
            control_std_meta_param: 2,

            parser_json_name: "parser",
            deparser_json_name: "deparser",
            ingress_json_name: "ingress",
            egress_json_name: "egress",
            std_meta_json_name: "standard_metadata",
            force_arith_fields: &["intrinsic_metadata", "queueing_metadata"],

            default_table_size: 1024,
            max_shift_width: 8,
        }
    }
}

impl SwitchModel {
    /// Maps a declared hash-algorithm member to the runtime's algorithm
    /// string. Unknown algorithms return `None` and are user errors.
    pub fn hash_algorithm(&self, name: &str) -> Option<&'static str> {
        match name {
            "crc32" => Some("crc32"),
            "crc32_custom" => Some("crc32_custom"),
            "crc16" => Some("crc16"),
            "crc16_custom" => Some("crc16_custom"),
            "random" => Some("random"),
            "identity" => Some("identity"),
            _ => None,
        }
    }

    /// Maps a meter-kind member (`packets`/`bytes`) to the runtime string.
    pub fn meter_kind(&self, name: &str) -> Option<&'static str> {
        if name == self.meter_packets {
            Some("packets")
        } else if name == self.meter_bytes {
            Some("bytes")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_mapping() {
        let model = SwitchModel::default();
        assert_eq!(model.hash_algorithm("crc16"), Some("crc16"));
        assert_eq!(model.hash_algorithm("crc32_custom"), Some("crc32_custom"));
        assert_eq!(model.hash_algorithm("csum16"), None);
    }

    #[test]
    fn meter_kind_mapping() {
        let model = SwitchModel::default();
        assert_eq!(model.meter_kind("packets"), Some("packets"));
        assert_eq!(model.meter_kind("bytes"), Some("bytes"));
        assert_eq!(model.meter_kind("cells"), None);
    }
}
