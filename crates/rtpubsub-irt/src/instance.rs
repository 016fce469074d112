use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{IrtError, Result};

/// Byte offsets within an instance slot. The header is followed immediately
/// by up to `max_instance_payload` payload bytes, mirroring the C original's
/// practice of placing the header directly before the opaque payload in the
/// same allocation so that one commit publishes both atomically.
const OFF_ENABLED: usize = 0;
const OFF_PERIOD: usize = 1;
const OFF_OFFSET: usize = 5;
const OFF_CB_START: usize = 9;
const OFF_CB_ELAPSED: usize = 17;
const OFF_CB_STOP: usize = 25;
const OFF_PAYLOAD_LEN: usize = 33;
pub(crate) const HEADER_LEN: usize = 37;

/// Per-instance lifecycle state. `Reserving` covers both "a write slot has
/// been claimed and is being filled" (plain setters) and "a data handle is
/// open for writing" (`handle_init`/`handle_get`); `Releasing` marks the
/// commit step of a data-handle session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstanceStatus {
    NotUsed = 0,
    Reserving = 1,
    Releasing = 2,
}

pub(crate) struct InstanceGate {
    status: AtomicU8,
}

impl InstanceGate {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(InstanceStatus::NotUsed as u8),
        }
    }

    /// Single-attempt CAS from `from` to `to`; no retry loop, since every
    /// caller represents one logical attempt with an explicit
    /// `InvalidState` fallback rather than a spin.
    pub(crate) fn transition(&self, from: InstanceStatus, to: InstanceStatus) -> Result<()> {
        self.status
            .compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| IrtError::InvalidState)
    }

    pub(crate) fn reset(&self) {
        self.status
            .store(InstanceStatus::NotUsed as u8, Ordering::Release);
    }
}

/// Callback set for one timer instance, monomorphized over the shared
/// context type `C` chosen once per [`crate::Irt`]. Plain function pointers
/// only, never `dyn Fn`, so the tick call site never allocates or
/// dynamically dispatches.
pub struct InstanceConfig<C> {
    pub period: u32,
    pub offset: u32,
    pub enabled: bool,
    pub cb_start: Option<fn(u32, &mut C)>,
    pub cb_elapsed: Option<fn(u32, &mut C, &[u8])>,
    pub cb_stop: Option<fn(u32, &mut C)>,
}

impl<C> Default for InstanceConfig<C> {
    fn default() -> Self {
        Self {
            period: 0,
            offset: 0,
            enabled: false,
            cb_start: None,
            cb_elapsed: None,
            cb_stop: None,
        }
    }
}

// SAFETY: `Option<fn(...)>` has the same representation as a plain pointer
// (the null-pointer optimization applies to function pointers), so it is
// layout-compatible with `u64` on the 64-bit targets this workspace assumes
// (see the workspace lint block's cast-lints rationale). This lets the
// callback set travel through the same flat byte buffer as the rest of the
// instance header, preserving the single-commit-publishes-everything
// contract instead of splitting callbacks into a separately-swapped word.
fn cb2_to_bits<C>(f: Option<fn(u32, &mut C)>) -> u64 {
    unsafe { std::mem::transmute(f) }
}

fn bits_to_cb2<C>(bits: u64) -> Option<fn(u32, &mut C)> {
    unsafe { std::mem::transmute(bits) }
}

fn cb3_to_bits<C>(f: Option<fn(u32, &mut C, &[u8])>) -> u64 {
    unsafe { std::mem::transmute(f) }
}

fn bits_to_cb3<C>(bits: u64) -> Option<fn(u32, &mut C, &[u8])> {
    unsafe { std::mem::transmute(bits) }
}

pub(crate) fn encode_header<C>(buf: &mut [u8], cfg: &InstanceConfig<C>, payload_len: u32) {
    buf[OFF_ENABLED] = u8::from(cfg.enabled);
    buf[OFF_PERIOD..OFF_PERIOD + 4].copy_from_slice(&cfg.period.to_ne_bytes());
    buf[OFF_OFFSET..OFF_OFFSET + 4].copy_from_slice(&cfg.offset.to_ne_bytes());
    buf[OFF_CB_START..OFF_CB_START + 8].copy_from_slice(&cb2_to_bits(cfg.cb_start).to_ne_bytes());
    buf[OFF_CB_ELAPSED..OFF_CB_ELAPSED + 8]
        .copy_from_slice(&cb3_to_bits(cfg.cb_elapsed).to_ne_bytes());
    buf[OFF_CB_STOP..OFF_CB_STOP + 8].copy_from_slice(&cb2_to_bits(cfg.cb_stop).to_ne_bytes());
    buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4].copy_from_slice(&payload_len.to_ne_bytes());
}

/// A read-only view over a decoded instance header plus its payload,
/// borrowed from the buffer it was decoded from.
pub(crate) struct InstanceView<'a, C> {
    pub(crate) enabled: bool,
    pub(crate) period: u32,
    pub(crate) offset: u32,
    pub(crate) cb_start: Option<fn(u32, &mut C)>,
    pub(crate) cb_elapsed: Option<fn(u32, &mut C, &[u8])>,
    pub(crate) cb_stop: Option<fn(u32, &mut C)>,
    pub(crate) payload: &'a [u8],
    _marker: PhantomData<fn(&mut C)>,
}

pub(crate) fn decode_header<C>(buf: &[u8]) -> InstanceView<'_, C> {
    let enabled = buf[OFF_ENABLED] != 0;
    let period = u32::from_ne_bytes(buf[OFF_PERIOD..OFF_PERIOD + 4].try_into().unwrap());
    let offset = u32::from_ne_bytes(buf[OFF_OFFSET..OFF_OFFSET + 4].try_into().unwrap());
    let cb_start = bits_to_cb2(u64::from_ne_bytes(
        buf[OFF_CB_START..OFF_CB_START + 8].try_into().unwrap(),
    ));
    let cb_elapsed = bits_to_cb3(u64::from_ne_bytes(
        buf[OFF_CB_ELAPSED..OFF_CB_ELAPSED + 8].try_into().unwrap(),
    ));
    let cb_stop = bits_to_cb2(u64::from_ne_bytes(
        buf[OFF_CB_STOP..OFF_CB_STOP + 8].try_into().unwrap(),
    ));
    let payload_len = u32::from_ne_bytes(
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4]
            .try_into()
            .unwrap(),
    ) as usize;
    let payload = &buf[HEADER_LEN..HEADER_LEN + payload_len];

    InstanceView {
        enabled,
        period,
        offset,
        cb_start,
        cb_elapsed,
        cb_stop,
        payload,
        _marker: PhantomData,
    }
}
