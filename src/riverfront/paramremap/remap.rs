//! Rewrites PostgreSQL Bind/Parse payloads to inject hidden "extracted
//! constant" and "global" parameters at the tail of the external parameter
//! list (§4.G). The wire never carries these: the compiler's `QueryUnitGroup`
//! says how many there are and what they encode to, and this module splices
//! them in before the batch reaches the backend.

use bytes::{BufMut, BytesMut};

use crate::riverfront::pg::protocol::MessageReader;
use crate::riverfront::pgview::Settings;
use crate::riverfront::{Error, Result};

/// Standard PostgreSQL type OIDs used to binary-encode global values.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const UUID: u32 = 2950;
    pub const UNSPECIFIED: u32 = 0;
}

/// One extracted-constant hidden parameter: a literal hoisted by the query
/// normalizer so the normalized source stays cacheable, sent in text format.
#[derive(Clone, Debug)]
pub struct ExtractedConstant {
    pub type_oid: u32,
    pub text: String,
}

/// One hidden "global" parameter: a value pulled from `fe_settings["global
/// <module>::<name>"]` and sent in binary format using its declared PG type.
#[derive(Clone, Debug)]
pub struct GlobalParam {
    pub module: String,
    pub name: String,
    pub type_oid: u32,
}

/// Everything `remap_arguments`/`remap_parameters` need to know about the
/// hidden parameters a compiled query wants appended: how many external
/// (wire-carried) parameters it expects, plus the extracted constants and
/// globals to splice in after them, in declared order.
#[derive(Clone, Debug, Default)]
pub struct ParamSchema {
    pub external_count: u16,
    pub extracted_constants: Vec<ExtractedConstant>,
    pub globals: Vec<GlobalParam>,
}

impl ParamSchema {
    pub fn hidden_count(&self) -> usize {
        self.extracted_constants.len() + self.globals.len()
    }
}

fn global_key(g: &GlobalParam) -> String {
    format!("global {}::{}", g.module, g.name)
}

fn encode_global_binary(value: &str, type_oid: u32) -> Result<Vec<u8>> {
    Ok(match type_oid {
        oid::TEXT => value.as_bytes().to_vec(),
        oid::UUID => {
            let u = uuid::Uuid::parse_str(value).map_err(|e| Error::protocol_violation(e.to_string()))?;
            u.as_bytes().to_vec()
        }
        oid::INT2 => (value.parse::<i16>().map_err(|e| Error::protocol_violation(e.to_string()))?).to_be_bytes().to_vec(),
        oid::INT4 => (value.parse::<i32>().map_err(|e| Error::protocol_violation(e.to_string()))?).to_be_bytes().to_vec(),
        oid::INT8 => (value.parse::<i64>().map_err(|e| Error::protocol_violation(e.to_string()))?).to_be_bytes().to_vec(),
        oid::BOOL => {
            let b = crate::riverfront::pgview::is_setting_truthy(value)
                .ok_or_else(|| Error::protocol_violation("ambiguous boolean global value"))?;
            vec![b as u8]
        }
        oid::FLOAT4 => (value.parse::<f32>().map_err(|e| Error::protocol_violation(e.to_string()))?).to_be_bytes().to_vec(),
        oid::FLOAT8 => (value.parse::<f64>().map_err(|e| Error::protocol_violation(e.to_string()))?).to_be_bytes().to_vec(),
        _ => value.as_bytes().to_vec(),
    })
}

/// Rewrites the argument-block portion of a `Bind` message (everything from
/// `n_format_codes` onward, i.e. with the portal/statement names already
/// stripped by the caller) to append extracted constants and globals after
/// the client-supplied external values.
///
/// Format: `n_format_codes:i16, format_codes:i16[n], n_values:i16,
/// values:{len:i32, bytes:len}[n_values], n_result_formats:i16,
/// result_formats:i16[]`. `len == -1` denotes NULL.
pub fn remap_arguments(bind_args: &[u8], schema: &ParamSchema, fe_settings: &Settings) -> Result<Vec<u8>> {
    let msg = crate::riverfront::pg::protocol::Message::new(bytes::Bytes::copy_from_slice(bind_args));
    let mut r = MessageReader::new_at(&msg, 0);

    let n_format_codes = r.read_i16();
    let mut format_codes = Vec::with_capacity(n_format_codes.max(0) as usize);
    for _ in 0..n_format_codes {
        format_codes.push(r.read_i16());
    }
    let n_values = r.read_i16();
    if n_values as usize != schema.external_count as usize {
        return Err(Error::protocol_violation("bind argument count does not match compiled parameter count"));
    }
    let mut values: Vec<Option<Vec<u8>>> = Vec::with_capacity(n_values as usize);
    for _ in 0..n_values {
        match r.read_len_prefixed_bytes()? {
            Some(bytes) => values.push(Some(bytes.to_vec())),
            None => values.push(None),
        }
    }
    let n_result_formats = r.read_i16();
    let mut result_formats = Vec::with_capacity(n_result_formats.max(0) as usize);
    for _ in 0..n_result_formats {
        result_formats.push(r.read_i16());
    }
    if r.has_error() {
        return Err(Error::protocol_violation("truncated bind message"));
    }

    // broadcast: a single format code applies to every external param, per PG rules
    let external_code_for = |i: usize| -> i16 {
        if format_codes.is_empty() {
            0
        } else if format_codes.len() == 1 {
            format_codes[0]
        } else {
            format_codes[i]
        }
    };

    let total = schema.external_count as usize + schema.hidden_count();
    let mut out = BytesMut::with_capacity(bind_args.len() + 64 * schema.hidden_count());

    out.put_i16(total as i16);
    for i in 0..schema.external_count as usize {
        out.put_i16(external_code_for(i));
    }
    for _ in &schema.extracted_constants {
        out.put_i16(0); // text
    }
    for _ in &schema.globals {
        out.put_i16(1); // binary
    }

    out.put_i16(total as i16);
    for v in &values {
        match v {
            Some(bytes) => {
                out.put_i32(bytes.len() as i32);
                out.put_slice(bytes);
            }
            None => out.put_i32(-1),
        }
    }
    for ec in &schema.extracted_constants {
        let bytes = ec.text.as_bytes();
        out.put_i32(bytes.len() as i32);
        out.put_slice(bytes);
    }
    for g in &schema.globals {
        let key = global_key(g);
        match fe_settings.get(&key).and_then(|v| v.as_ref()) {
            Some(value) => {
                let encoded = encode_global_binary(value, g.type_oid)?;
                out.put_i32(encoded.len() as i32);
                out.put_slice(&encoded);
            }
            None => out.put_i32(-1),
        }
    }

    out.put_i16(n_result_formats);
    for fmt in &result_formats {
        out.put_i16(*fmt);
    }

    Ok(out.to_vec())
}

/// Appends OID type codes for the hidden parameters at the end of a Parse
/// message's parameter-type list: `0` (unspecified) for globals, the
/// declared `type_oid` for extracted constants.
pub fn remap_parameters(parse_param_oids: &[u32], schema: &ParamSchema) -> Vec<u32> {
    let mut out = Vec::with_capacity(parse_param_oids.len() + schema.hidden_count());
    out.extend_from_slice(parse_param_oids);
    for ec in &schema.extracted_constants {
        out.push(ec.type_oid);
    }
    for _ in &schema.globals {
        out.push(oid::UNSPECIFIED);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_bind_args(values: &[&[u8]]) -> Vec<u8> {
        let mut b = BytesMut::new();
        b.put_i16(0); // format codes: none, default to text
        b.put_i16(values.len() as i16);
        for v in values {
            b.put_i32(v.len() as i32);
            b.put_slice(v);
        }
        b.put_i16(0); // result format codes
        b.to_vec()
    }

    #[test]
    fn round_trip_preserves_external_and_appends_hidden() {
        let args = build_bind_args(&[b"hi"]);
        let schema = ParamSchema {
            external_count: 1,
            extracted_constants: vec![ExtractedConstant { type_oid: oid::INT4, text: "42".into() }],
            globals: vec![GlobalParam { module: "default".into(), name: "current_user_id".into(), type_oid: oid::UUID }],
        };
        let fe_settings = Settings::new().mutate().set(
            "global default::current_user_id",
            Some(std::sync::Arc::from("00000000-0000-0000-0000-000000000001")),
        ).finish();

        let remapped = remap_arguments(&args, &schema, &fe_settings).unwrap();
        let msg = crate::riverfront::pg::protocol::Message::new(bytes::Bytes::from(remapped));
        let mut r = MessageReader::new_at(&msg, 0);
        let n_fmt = r.read_i16();
        for _ in 0..n_fmt { r.read_i16(); }
        let n_vals = r.read_i16();
        assert_eq!(n_vals, 3);
        let external = r.read_len_prefixed_bytes().unwrap().unwrap();
        assert_eq!(external, b"hi");
        let constant = r.read_len_prefixed_bytes().unwrap().unwrap();
        assert_eq!(constant, b"42");
        let global = r.read_len_prefixed_bytes().unwrap().unwrap();
        assert_eq!(global.len(), 16);
    }

    #[test]
    fn mismatched_external_count_is_protocol_violation() {
        let args = build_bind_args(&[b"a", b"b"]);
        let schema = ParamSchema { external_count: 1, ..Default::default() };
        let err = remap_arguments(&args, &schema, &Settings::new()).unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::ProtocolViolation);
    }
}
