//! Profile codecs for the algebra types.
//!
//! Trees are written pre-order: a presence flag plus base value, then a
//! child count followed by dimension/subtree pairs. Children are written
//! in map order, so encoding is deterministic for a given value.

use crate::error::{Result, WireError};
use crate::primitive::{Reader, Writer};
use aether_core::{BaseValue, CompoundDimension, Context, ContextOp, Dimension};

/// A value with a profile encoding.
pub trait Wire: Sized {
    fn encode(&self, w: &mut Writer);
    fn decode(r: &mut Reader<'_>) -> Result<Self>;
}

pub(crate) fn encode_option<T: Wire>(value: &Option<T>, w: &mut Writer) {
    match value {
        Some(v) => {
            w.put_bool(true);
            v.encode(w);
        }
        None => w.put_bool(false),
    }
}

pub(crate) fn decode_option<T: Wire>(r: &mut Reader<'_>) -> Result<Option<T>> {
    if r.get_bool()? {
        Ok(Some(T::decode(r)?))
    } else {
        Ok(None)
    }
}

mod tag {
    pub const DIM_INDEX: u8 = 0;
    pub const DIM_NAME: u8 = 1;

    pub const BASE_MINIMAL: u8 = 0;
    pub const BASE_MAXIMAL: u8 = 1;
    pub const BASE_NUMBER: u8 = 2;
    pub const BASE_STR: u8 = 3;
    pub const BASE_BINARY: u8 = 4;
    pub const BASE_BOUND: u8 = 5;
}

impl Wire for Dimension {
    fn encode(&self, w: &mut Writer) {
        match self {
            Dimension::Index(i) => {
                w.put_u8(tag::DIM_INDEX);
                w.put_i64(*i);
            }
            Dimension::Name(name) => {
                w.put_u8(tag::DIM_NAME);
                w.put_str(name);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match r.get_u8()? {
            tag::DIM_INDEX => Ok(Dimension::Index(r.get_i64()?)),
            // normalizes integer-looking names to indices
            tag::DIM_NAME => Ok(Dimension::name(r.get_str()?)),
            t => Err(WireError::BadTag {
                kind: "dimension",
                tag: t,
            }),
        }
    }
}

impl Wire for CompoundDimension {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.len() as u32);
        for dim in self.dims() {
            dim.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.get_u32()? as usize;
        let mut dims = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            dims.push(Dimension::decode(r)?);
        }
        Ok(CompoundDimension::new(dims))
    }
}

impl Wire for BaseValue {
    fn encode(&self, w: &mut Writer) {
        match self {
            BaseValue::Minimal => w.put_u8(tag::BASE_MINIMAL),
            BaseValue::Maximal => w.put_u8(tag::BASE_MAXIMAL),
            BaseValue::Number(n) => {
                w.put_u8(tag::BASE_NUMBER);
                w.put_f64(*n);
            }
            BaseValue::Str(s) => {
                w.put_u8(tag::BASE_STR);
                w.put_str(s);
            }
            BaseValue::Binary(data) => {
                w.put_u8(tag::BASE_BINARY);
                w.put_bytes(data);
            }
            BaseValue::Bound { alias, data } => {
                w.put_u8(tag::BASE_BOUND);
                w.put_str(alias);
                w.put_bytes(data);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match r.get_u8()? {
            tag::BASE_MINIMAL => Ok(BaseValue::Minimal),
            tag::BASE_MAXIMAL => Ok(BaseValue::Maximal),
            tag::BASE_NUMBER => Ok(BaseValue::Number(r.get_f64()?)),
            tag::BASE_STR => Ok(BaseValue::Str(r.get_str()?)),
            tag::BASE_BINARY => Ok(BaseValue::Binary(r.get_bytes()?)),
            tag::BASE_BOUND => Ok(BaseValue::Bound {
                alias: r.get_str()?,
                data: r.get_bytes()?,
            }),
            t => Err(WireError::BadTag {
                kind: "base value",
                tag: t,
            }),
        }
    }
}

impl Wire for Context {
    fn encode(&self, w: &mut Writer) {
        encode_option(&self.base().cloned(), w);
        w.put_u32(self.child_count() as u32);
        for (dim, child) in self.children() {
            dim.encode(w);
            child.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let mut node = match decode_option::<BaseValue>(r)? {
            Some(base) => Context::with_base(base),
            None => Context::new(),
        };
        let count = r.get_u32()? as usize;
        for _ in 0..count {
            let dim = Dimension::decode(r)?;
            let child = Context::decode(r)?;
            // keep explicitly empty children; assign-style insertion would
            // prune them and break the round trip
            node.insert_child(dim, child);
        }
        Ok(node)
    }
}

impl Wire for ContextOp {
    fn encode(&self, w: &mut Writer) {
        encode_option(&self.base().cloned(), w);
        w.put_bool(self.clear_base());
        w.put_bool(self.clear_dims());
        w.put_u32(self.children().count() as u32);
        for (dim, child) in self.children() {
            dim.encode(w);
            child.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let mut op = ContextOp::new();
        if let Some(base) = decode_option::<BaseValue>(r)? {
            op.set_base(base);
        }
        op.set_clear_base(r.get_bool()?);
        op.set_clear_dims(r.get_bool()?);
        let count = r.get_u32()? as usize;
        for _ in 0..count {
            let dim = Dimension::decode(r)?;
            let child = ContextOp::decode(r)?;
            *op.value(dim) = child;
        }
        op.normalize();
        Ok(op)
    }
}
