//! WebAssembly value types and the 64-bit carrier codec.
//!
//! Every value crossing the public call boundary is a `u64` carrier holding
//! the native bit pattern of the value: 32-bit integers live in the low half
//! (zero-extended), floats keep their raw IEEE-754 bits, references keep
//! their raw address.

use std::fmt;
use std::mem::size_of;
use std::str::FromStr;

use crate::ffi::types::{wasm_valkind_t, wasmtime_func_t, wasmtime_valkind_t, TaggedValue};

/// Type of a WebAssembly value. Discriminants are the `wasmtime_val_t` kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32 = 0,
    I64 = 1,
    F32 = 2,
    F64 = 3,
    V128 = 4,
    FuncRef = 5,
    ExternRef = 6,
}

impl ValType {
    pub(crate) fn wasmtime_kind(self) -> wasmtime_valkind_t {
        self as u8
    }

    pub(crate) fn from_wasmtime_kind(kind: wasmtime_valkind_t) -> Option<Self> {
        Some(match kind {
            0 => Self::I32,
            1 => Self::I64,
            2 => Self::F32,
            3 => Self::F64,
            4 => Self::V128,
            5 => Self::FuncRef,
            6 => Self::ExternRef,
            _ => return None,
        })
    }

    /// Kind used by `wasm_valtype_new` / `wasm_valtype_kind` in `wasm.h`.
    pub(crate) fn wasm_kind(self) -> wasm_valkind_t {
        match self {
            Self::I32 => 0,
            Self::I64 => 1,
            Self::F32 => 2,
            Self::F64 => 3,
            Self::V128 => 4,
            Self::ExternRef => 128,
            Self::FuncRef => 129,
        }
    }

    pub(crate) fn from_wasm_kind(kind: wasm_valkind_t) -> Option<Self> {
        Some(match kind {
            0 => Self::I32,
            1 => Self::I64,
            2 => Self::F32,
            3 => Self::F64,
            4 => Self::V128,
            128 => Self::ExternRef,
            129 => Self::FuncRef,
            _ => return None,
        })
    }

    /// Whether a value of this type survives an encode/decode cycle through the carrier.
    ///
    /// `v128` does not fit in 64 bits and funcref handles are not reconstructed;
    /// both decode to a `0` placeholder.
    pub fn round_trips(self) -> bool {
        !matches!(self, Self::V128 | Self::FuncRef)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::V128 => "v128",
            Self::FuncRef => "funcref",
            Self::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

impl FromStr for ValType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i32" => Ok(Self::I32),
            "i64" => Ok(Self::I64),
            "f32" => Ok(Self::F32),
            "f64" => Ok(Self::F64),
            "v128" => Ok(Self::V128),
            "funcref" => Ok(Self::FuncRef),
            "externref" => Ok(Self::ExternRef),
            other => Err(format!("unknown value type: {other}")),
        }
    }
}

pub fn encode_i32(value: i32) -> u64 {
    value as u32 as u64
}

pub fn decode_i32(carrier: u64) -> i32 {
    carrier as u32 as i32
}

pub fn encode_u32(value: u32) -> u64 {
    value as u64
}

pub fn decode_u32(carrier: u64) -> u32 {
    carrier as u32
}

pub fn encode_i64(value: i64) -> u64 {
    value as u64
}

pub fn decode_i64(carrier: u64) -> i64 {
    carrier as i64
}

pub fn encode_f32(value: f32) -> u64 {
    value.to_bits() as u64
}

pub fn decode_f32(carrier: u64) -> f32 {
    f32::from_bits(carrier as u32)
}

pub fn encode_f64(value: f64) -> u64 {
    value.to_bits()
}

pub fn decode_f64(carrier: u64) -> f64 {
    f64::from_bits(carrier)
}

pub fn encode_externref(address: usize) -> u64 {
    address as u64
}

pub fn decode_externref(carrier: u64) -> usize {
    carrier as usize
}

impl TaggedValue {
    /// A value of type `ty` with an all-zero payload.
    pub fn zeroed(ty: ValType) -> Self {
        Self {
            kind: ty.wasmtime_kind(),
            _padding: [0; 7],
            of: [0; crate::ffi::types::VAL_PAYLOAD_SIZE],
        }
    }

    /// Packs a carrier into the payload slot selected by `ty`.
    ///
    /// `v128` receives the carrier as its low 64 bits; funcref is always the null function.
    pub fn encode(carrier: u64, ty: ValType) -> Self {
        let mut value = Self::zeroed(ty);
        match ty {
            ValType::I32 | ValType::F32 => {
                value.of[..4].copy_from_slice(&(carrier as u32).to_ne_bytes());
            }
            ValType::I64 | ValType::F64 => {
                value.of[..8].copy_from_slice(&carrier.to_ne_bytes());
            }
            ValType::V128 => {
                value.of[..8].copy_from_slice(&carrier.to_le_bytes());
            }
            ValType::FuncRef => {
                let null = wasmtime_func_t {
                    store_id: 0,
                    private: std::ptr::null_mut(),
                };
                // Payload is 8-byte aligned and larger than the record.
                unsafe { std::ptr::write(value.of.as_mut_ptr().cast::<wasmtime_func_t>(), null) };
            }
            ValType::ExternRef => {
                let address = decode_externref(carrier);
                value.of[..size_of::<usize>()].copy_from_slice(&address.to_ne_bytes());
            }
        }
        value
    }

    pub fn kind(&self) -> Option<ValType> {
        ValType::from_wasmtime_kind(self.kind)
    }

    /// Reads the payload according to the discriminant.
    ///
    /// Kinds without a carrier representation (v128, funcref, unknown) yield `0`.
    pub fn decode(&self) -> u64 {
        match self.kind() {
            Some(ValType::I32) | Some(ValType::F32) => {
                u32::from_ne_bytes([self.of[0], self.of[1], self.of[2], self.of[3]]) as u64
            }
            Some(ValType::I64) | Some(ValType::F64) => self.read_u64(),
            Some(ValType::ExternRef) => {
                let mut bytes = [0u8; size_of::<usize>()];
                bytes.copy_from_slice(&self.of[..size_of::<usize>()]);
                encode_externref(usize::from_ne_bytes(bytes))
            }
            Some(ty @ (ValType::V128 | ValType::FuncRef)) => {
                tracing::trace!("{ty} has no carrier representation; decoding as 0");
                0
            }
            None => {
                tracing::trace!("unknown value kind {}; decoding as 0", self.kind);
                0
            }
        }
    }

    /// Decodes only if the discriminant matches `ty`.
    pub fn decode_as(&self, ty: ValType) -> Option<u64> {
        (self.kind == ty.wasmtime_kind()).then(|| self.decode())
    }

    fn read_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.of[..8]);
        u64::from_ne_bytes(bytes)
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(ty) => write!(f, "{ty}:{:#x}", self.decode()),
            None => write!(f, "unknown({})", self.kind),
        }
    }
}
