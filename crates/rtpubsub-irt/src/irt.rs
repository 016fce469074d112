use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicU32;

use rtpubsub_dbo::Dbo;

use crate::error::{IrtError, Result};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_start_stop_interleaved;
use crate::invariants::debug_assert_not_reentrant;
use crate::instance::{decode_header, encode_header, InstanceConfig, InstanceGate, InstanceStatus, HEADER_LEN};
use crate::workspace::Workspace;

struct InstanceSlot {
    gate: InstanceGate,
    prev_enabled: AtomicBool,
    dbo: Dbo,
    #[cfg(debug_assertions)]
    start_count: AtomicU32,
    #[cfg(debug_assertions)]
    stop_count: AtomicU32,
}

/// A tick-driven array of periodic timer instances, each publishing its
/// payload through a two-slot [`Dbo`] register. One [`Irt::update`] call
/// per external tick drives edge (`cb_start`/`cb_stop`) and period-elapsed
/// (`cb_elapsed`) callbacks for every enabled instance, synchronously on
/// the calling thread.
///
/// `C` is the shared context type threaded through every callback; it
/// replaces the C original's per-instance `void*` user context, since a
/// single type parameter chosen once per `Irt<C>` is enough to give every
/// callback a typed, allocation-free handle back into the application.
pub struct Irt<C> {
    workspace: Workspace,
    tick: AtomicU64,
    tick_in_progress: AtomicBool,
    max_instance_payload: usize,
    instances: Box<[InstanceSlot]>,
    _marker: PhantomData<fn(&mut C)>,
}

impl<C> Irt<C> {
    /// Allocates `n_instances` timer instances, each able to hold up to
    /// `max_instance_payload` bytes. The workspace starts `NotInitialized`;
    /// call [`Irt::initialize`] before configuring or ticking instances.
    pub fn new(n_instances: usize, max_instance_payload: usize) -> Result<Self> {
        if n_instances == 0 {
            return Err(IrtError::BadArg("n_instances must be >= 1"));
        }
        if max_instance_payload == 0 {
            return Err(IrtError::BadArg("max_instance_payload must be >= 1"));
        }

        let slot_size = HEADER_LEN + max_instance_payload;
        let mut instances = Vec::with_capacity(n_instances);
        for _ in 0..n_instances {
            let dbo = Dbo::new(2, slot_size).map_err(|_| IrtError::BadArg("invalid dbo sizing"))?;
            {
                // A fresh 2-slot Dbo never has readers, so this cannot fail.
                let mut w = dbo.get_write_slot().expect("fresh dbo always has a writable slot");
                encode_header(w.as_mut_slice(), &InstanceConfig::<C>::default(), 0);
                w.commit();
            }
            instances.push(InstanceSlot {
                gate: InstanceGate::new(),
                prev_enabled: AtomicBool::new(false),
                dbo,
                #[cfg(debug_assertions)]
                start_count: AtomicU32::new(0),
                #[cfg(debug_assertions)]
                stop_count: AtomicU32::new(0),
            });
        }

        Ok(Self {
            workspace: Workspace::new(),
            tick: AtomicU64::new(0),
            tick_in_progress: AtomicBool::new(false),
            max_instance_payload,
            instances: instances.into_boxed_slice(),
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn n_instances(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn max_instance_payload(&self) -> usize {
        self.max_instance_payload
    }

    /// `NotInitialized -> Initializing -> Initialized`.
    pub fn initialize(&self) -> Result<()> {
        self.workspace.initialize()
    }

    /// `Initialized -> Deinitializing -> NotInitialized`. Fails if any
    /// call is currently in flight.
    pub fn deinitialize(&self) -> Result<()> {
        self.workspace.deinitialize()
    }

    fn check_id(&self, id: usize) -> Result<()> {
        if id >= self.instances.len() {
            return Err(IrtError::BadInstance {
                id,
                n_instances: self.instances.len(),
            });
        }
        Ok(())
    }

    fn current_config(&self, slot: &InstanceSlot) -> InstanceConfig<C> {
        let r = slot.dbo.get_read_slot();
        let view = decode_header::<C>(r.as_slice());
        InstanceConfig {
            period: view.period,
            offset: view.offset,
            enabled: view.enabled,
            cb_start: view.cb_start,
            cb_elapsed: view.cb_elapsed,
            cb_stop: view.cb_stop,
        }
    }

    /// Reads the current payload length for `id` without claiming the
    /// write gate (used by setters that preserve the existing payload).
    fn current_payload(&self, slot: &InstanceSlot) -> Vec<u8> {
        let r = slot.dbo.get_read_slot();
        decode_header::<C>(r.as_slice()).payload.to_vec()
    }

    /// Claims the instance, applies `mutate` to a copy of its current
    /// config, preserves the existing payload, commits, and always
    /// releases the gate — including when the write slot could not be
    /// claimed, so a transient `NoWritableSlot` never leaves the instance
    /// stuck in `Reserving`.
    fn reconfigure(&self, id: usize, mutate: impl FnOnce(&mut InstanceConfig<C>)) -> Result<()> {
        let _guard = self.workspace.enter()?;
        self.check_id(id)?;
        let slot = &self.instances[id];
        slot.gate
            .transition(InstanceStatus::NotUsed, InstanceStatus::Reserving)?;

        let mut cfg = self.current_config(slot);
        let payload = self.current_payload(slot);
        mutate(&mut cfg);

        let result = (|| -> Result<()> {
            let mut w = slot.dbo.get_write_slot()?;
            let buf = w.as_mut_slice();
            buf[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(&payload);
            encode_header(buf, &cfg, payload.len() as u32);
            w.commit();
            Ok(())
        })();

        slot.gate.reset();
        result
    }

    /// Resets instance `id` to the given configuration, discarding any
    /// previous payload.
    pub fn instance_init(&self, id: usize, cfg: InstanceConfig<C>) -> Result<()> {
        let _guard = self.workspace.enter()?;
        self.check_id(id)?;
        let slot = &self.instances[id];
        slot.gate
            .transition(InstanceStatus::NotUsed, InstanceStatus::Reserving)?;

        // `prev_enabled` is left at its `false` default: an instance
        // initialized with `enabled == true` must still fire the rising
        // `cb_start` edge on the first tick that observes it.
        let result = (|| -> Result<()> {
            let mut w = slot.dbo.get_write_slot()?;
            encode_header(w.as_mut_slice(), &cfg, 0);
            w.commit();
            Ok(())
        })();

        slot.gate.reset();
        result
    }

    /// Forces instance `id` to stop at the next tick without invoking
    /// `cb_stop`, by suppressing the edge the tick would otherwise detect.
    pub fn instance_deinit(&self, id: usize) -> Result<()> {
        self.reconfigure(id, |cfg| cfg.enabled = false)?;
        self.instances[id].prev_enabled.store(false, Ordering::Release);
        Ok(())
    }

    pub fn instance_start(&self, id: usize) -> Result<()> {
        self.reconfigure(id, |cfg| cfg.enabled = true)
    }

    pub fn instance_stop(&self, id: usize) -> Result<()> {
        self.reconfigure(id, |cfg| cfg.enabled = false)
    }

    pub fn instance_set_period(&self, id: usize, period: u32) -> Result<()> {
        self.reconfigure(id, |cfg| cfg.period = period)
    }

    pub fn instance_set_offset(&self, id: usize, offset: u32) -> Result<()> {
        self.reconfigure(id, |cfg| cfg.offset = offset)
    }

    pub fn instance_set_callbacks(
        &self,
        id: usize,
        cb_start: Option<fn(u32, &mut C)>,
        cb_elapsed: Option<fn(u32, &mut C, &[u8])>,
        cb_stop: Option<fn(u32, &mut C)>,
    ) -> Result<()> {
        self.reconfigure(id, |cfg| {
            cfg.cb_start = cb_start;
            cfg.cb_elapsed = cb_elapsed;
            cfg.cb_stop = cb_stop;
        })
    }

    /// Publishes new payload bytes, taken into account by the next
    /// `update`. Oversized payloads are rejected with
    /// [`IrtError::Overflow`] before any write slot is claimed, so a
    /// rejected call never disturbs the instance's committed state.
    pub fn instance_set_data(&self, id: usize, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_instance_payload {
            return Err(IrtError::Overflow {
                max: self.max_instance_payload,
                got: bytes.len(),
            });
        }
        let _guard = self.workspace.enter()?;
        self.check_id(id)?;
        let slot = &self.instances[id];
        slot.gate
            .transition(InstanceStatus::NotUsed, InstanceStatus::Reserving)?;

        let cfg = self.current_config(slot);
        let result = (|| -> Result<()> {
            let mut w = slot.dbo.get_write_slot()?;
            let buf = w.as_mut_slice();
            buf[HEADER_LEN..HEADER_LEN + bytes.len()].copy_from_slice(bytes);
            encode_header(buf, &cfg, bytes.len() as u32);
            w.commit();
            Ok(())
        })();

        slot.gate.reset();
        result
    }

    /// Reads the instance's currently committed enabled/disabled state via
    /// the read path rather than the write path, so a status query never
    /// contends with a concurrent reconfiguration.
    pub fn instance_last_status(&self, id: usize) -> Result<bool> {
        let _guard = self.workspace.enter()?;
        self.check_id(id)?;
        let slot = &self.instances[id];
        let r = slot.dbo.get_read_slot();
        Ok(decode_header::<C>(r.as_slice()).enabled)
    }

    /// Opens a zero-copy write session for instance `id`'s payload.
    pub fn handle_init(&self, id: usize) -> Result<DataHandle<'_, C>> {
        let guard = self.workspace.enter()?;
        self.check_id(id)?;
        let slot = &self.instances[id];
        slot.gate
            .transition(InstanceStatus::NotUsed, InstanceStatus::Reserving)?;

        let cfg = self.current_config(slot);
        let w = match slot.dbo.get_write_slot() {
            Ok(w) => w,
            Err(e) => {
                slot.gate.reset();
                return Err(e.into());
            }
        };

        Ok(DataHandle {
            _use_guard: guard,
            gate: &slot.gate,
            guard_w: Some(w),
            cfg,
            max_payload: self.max_instance_payload,
            len: 0,
            finalized: false,
        })
    }

    /// Merges a monotonically increasing 32-bit external tick into the
    /// internal 64-bit counter, detecting a single wrap.
    fn merge_tick(&self, external: u32) -> u64 {
        let prev = self.tick.load(Ordering::Acquire);
        let prev_low = prev as u32;
        let mut merged = (prev & !0xFFFF_FFFFu64) | u64::from(external);
        if external < prev_low {
            merged = merged.wrapping_add(1u64 << 32);
        }
        self.tick.store(merged, Ordering::Release);
        merged
    }

    /// Advances the timer by one external tick, dispatching `cb_start`,
    /// `cb_elapsed`, and `cb_stop` synchronously on the calling thread for
    /// every instance whose state warrants it. Not reentrant: a call made
    /// from within a dispatched callback returns [`IrtError::InvalidState`].
    pub fn update(&self, external_tick: u32, ctx: &mut C) -> Result<()> {
        let _guard = self.workspace.enter()?;

        let was_in_progress = self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if was_in_progress {
            return Err(IrtError::InvalidState);
        }
        debug_assert_not_reentrant!(was_in_progress);

        let now = self.merge_tick(external_tick);

        for (id, slot) in self.instances.iter().enumerate() {
            let r = slot.dbo.get_read_slot();
            let view = decode_header::<C>(r.as_slice());
            let prev = slot.prev_enabled.load(Ordering::Acquire);
            let id = id as u32;

            if view.enabled && !prev {
                if let Some(cb) = view.cb_start {
                    cb(id, ctx);
                }
                #[cfg(debug_assertions)]
                slot.start_count.fetch_add(1, Ordering::Relaxed);
            }

            if view.enabled && view.period >= 1 {
                let phase = now.wrapping_add(u64::from(view.offset)) % u64::from(view.period);
                if phase == 0 {
                    if let Some(cb) = view.cb_elapsed {
                        cb(id, ctx, view.payload);
                    }
                }
            }

            if !view.enabled && prev {
                if let Some(cb) = view.cb_stop {
                    cb(id, ctx);
                }
                #[cfg(debug_assertions)]
                slot.stop_count.fetch_add(1, Ordering::Relaxed);
            }

            #[cfg(debug_assertions)]
            debug_assert_start_stop_interleaved!(
                slot.start_count.load(Ordering::Relaxed),
                slot.stop_count.load(Ordering::Relaxed)
            );

            slot.prev_enabled.store(view.enabled, Ordering::Release);
        }

        self.tick_in_progress.store(false, Ordering::Release);
        Ok(())
    }
}

/// A scoped, zero-copy write session over one instance's payload, opened by
/// [`Irt::handle_init`]. Dropping without calling [`DataHandle::end`]
/// releases the instance back to `NotUsed` without publishing anything,
/// exactly like a cancelled write.
pub struct DataHandle<'a, C> {
    _use_guard: crate::workspace::UseGuard<'a>,
    gate: &'a InstanceGate,
    guard_w: Option<rtpubsub_dbo::WriteGuard<'a>>,
    cfg: InstanceConfig<C>,
    max_payload: usize,
    len: usize,
    finalized: bool,
}

impl<'a, C> DataHandle<'a, C> {
    /// Returns `(payload buffer, max allowed size, current significant
    /// size)`.
    pub fn get(&mut self) -> (&mut [u8], usize, usize) {
        let max = self.max_payload;
        let len = self.len;
        let w = self.guard_w.as_mut().expect("data handle already finalized");
        (&mut w.as_mut_slice()[HEADER_LEN..HEADER_LEN + max], max, len)
    }

    /// Records the significant length of the payload written so far.
    pub fn set_new_size(&mut self, len: usize) -> Result<()> {
        if len > self.max_payload {
            return Err(IrtError::Overflow {
                max: self.max_payload,
                got: len,
            });
        }
        self.len = len;
        Ok(())
    }

    /// Commits the session unless `cancel` is set, then releases the
    /// instance back to `NotUsed`.
    pub fn end(mut self, cancel: bool) -> Result<()> {
        self.gate
            .transition(InstanceStatus::Reserving, InstanceStatus::Releasing)?;
        if !cancel {
            let mut w = self.guard_w.take().expect("write guard present until finalized");
            encode_header(w.as_mut_slice(), &self.cfg, self.len as u32);
            w.commit();
        }
        self.finalized = true;
        self.gate.reset();
        Ok(())
    }
}

impl<'a, C> Drop for DataHandle<'a, C> {
    fn drop(&mut self) {
        if !self.finalized {
            self.gate.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counters {
        starts: u32,
        elapsed: u32,
        stops: u32,
        last_payload: Vec<u8>,
    }

    fn on_start(_id: u32, ctx: &mut Counters) {
        ctx.starts += 1;
    }

    fn on_elapsed(_id: u32, ctx: &mut Counters, payload: &[u8]) {
        ctx.elapsed += 1;
        ctx.last_payload = payload.to_vec();
    }

    fn on_stop(_id: u32, ctx: &mut Counters) {
        ctx.stops += 1;
    }

    fn make_irt() -> Irt<Counters> {
        let irt = Irt::<Counters>::new(1, 16).unwrap();
        irt.initialize().unwrap();
        irt
    }

    #[test]
    fn periodic_instance_fires_start_then_elapsed_on_period_boundaries() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 4,
                offset: 0,
                enabled: true,
                cb_start: Some(on_start),
                cb_elapsed: Some(on_elapsed),
                cb_stop: Some(on_stop),
            },
        )
        .unwrap();

        let mut ctx = Counters::default();
        for tick in 0..16u32 {
            irt.update(tick, &mut ctx).unwrap();
        }

        assert_eq!(ctx.starts, 1);
        assert_eq!(ctx.stops, 0);
        // Ticks 0, 4, 8, 12 are on the boundary.
        assert_eq!(ctx.elapsed, 4);
    }

    #[test]
    fn zero_period_never_elapses() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 0,
                offset: 0,
                enabled: true,
                cb_start: Some(on_start),
                cb_elapsed: Some(on_elapsed),
                cb_stop: None,
            },
        )
        .unwrap();

        let mut ctx = Counters::default();
        for tick in 0..8u32 {
            irt.update(tick, &mut ctx).unwrap();
        }

        assert_eq!(ctx.starts, 1);
        assert_eq!(ctx.elapsed, 0);
    }

    #[test]
    fn stop_then_start_fires_edge_callbacks_once_each() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 1,
                offset: 0,
                enabled: true,
                cb_start: Some(on_start),
                cb_elapsed: Some(on_elapsed),
                cb_stop: Some(on_stop),
            },
        )
        .unwrap();

        let mut ctx = Counters::default();
        irt.update(0, &mut ctx).unwrap();
        irt.instance_stop(0).unwrap();
        irt.update(1, &mut ctx).unwrap();
        irt.instance_start(0).unwrap();
        irt.update(2, &mut ctx).unwrap();

        assert_eq!(ctx.starts, 2);
        assert_eq!(ctx.stops, 1);
    }

    #[test]
    fn instance_set_data_publishes_payload_seen_on_next_elapsed_callback() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 1,
                offset: 0,
                enabled: true,
                cb_start: None,
                cb_elapsed: Some(on_elapsed),
                cb_stop: None,
            },
        )
        .unwrap();
        irt.instance_set_data(0, b"payload-a").unwrap();

        let mut ctx = Counters::default();
        irt.update(0, &mut ctx).unwrap();
        assert_eq!(ctx.last_payload, b"payload-a");

        irt.instance_set_data(0, b"payload-b").unwrap();
        irt.update(1, &mut ctx).unwrap();
        assert_eq!(ctx.last_payload, b"payload-b");
    }

    #[test]
    fn instance_set_data_rejects_oversized_payload() {
        let irt = make_irt();
        irt.instance_init(0, InstanceConfig::default()).unwrap();
        let err = irt.instance_set_data(0, &[0u8; 1024]).unwrap_err();
        assert_eq!(
            err,
            IrtError::Overflow {
                max: 16,
                got: 1024
            }
        );
    }

    #[test]
    fn instance_deinit_suppresses_stop_callback() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 1,
                offset: 0,
                enabled: true,
                cb_start: Some(on_start),
                cb_elapsed: None,
                cb_stop: Some(on_stop),
            },
        )
        .unwrap();

        let mut ctx = Counters::default();
        irt.update(0, &mut ctx).unwrap();
        irt.instance_deinit(0).unwrap();
        irt.update(1, &mut ctx).unwrap();

        assert_eq!(ctx.starts, 1);
        assert_eq!(ctx.stops, 0);
        assert!(!irt.instance_last_status(0).unwrap());
    }

    #[test]
    fn data_handle_round_trips_and_cancel_discards() {
        let irt = make_irt();
        irt.instance_init(
            0,
            InstanceConfig {
                period: 1,
                offset: 0,
                enabled: true,
                cb_start: None,
                cb_elapsed: Some(on_elapsed),
                cb_stop: None,
            },
        )
        .unwrap();

        {
            let mut handle = irt.handle_init(0).unwrap();
            let (buf, max, _len) = handle.get();
            assert_eq!(max, 16);
            buf[..4].copy_from_slice(b"abcd");
            handle.set_new_size(4).unwrap();
            handle.end(false).unwrap();
        }

        let mut ctx = Counters::default();
        irt.update(0, &mut ctx).unwrap();
        assert_eq!(ctx.last_payload, b"abcd");

        {
            let mut handle = irt.handle_init(0).unwrap();
            let (buf, _max, _len) = handle.get();
            buf[..4].copy_from_slice(b"wxyz");
            handle.set_new_size(4).unwrap();
            handle.end(true).unwrap();
        }

        irt.update(1, &mut ctx).unwrap();
        assert_eq!(ctx.last_payload, b"abcd");
    }

    #[test]
    fn update_rejects_bad_instance_state_combinations() {
        let irt = Irt::<Counters>::new(2, 8).unwrap();
        assert_eq!(irt.initialize(), Ok(()));
        assert_eq!(irt.initialize(), Err(IrtError::InvalidState));
        assert_eq!(
            irt.instance_init(5, InstanceConfig::default()),
            Err(IrtError::BadInstance {
                id: 5,
                n_instances: 2
            })
        );
    }
}
