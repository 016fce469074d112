use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use rtpubsub_mbx::{Mbx, MbxError, PopGuard, PopMode, WriteSession};

use crate::error::{PubSubError, Result};

/// Per-pin step callback, monomorphized per `Subscriber<C, I>` the same
/// way [`rtpubsub_irt::Irt`] is monomorphized over its context type: a
/// plain function pointer, never a boxed closure, so dispatching it from
/// `heart_beat` never allocates.
///
/// Arguments: the subscriber itself (for `output_write`/`output_write_begin`
/// calls from within the callback), the global user context, the
/// registering input's own context, the input's pin index, and the event
/// bytes.
pub type StepCallback<C, I> = fn(&Subscriber<C, I>, &mut C, &mut I, usize, &[u8]);

struct InputPin<I> {
    mbx: Mbx,
    read_mode: PopMode,
    // Mutated only from `Subscriber::heart_beat`, which is documented
    // non-reentrant and single-threaded per input, mirroring the
    // `Dbo::Slot` banks: interior mutability behind a discipline enforced
    // by the caller rather than by a lock.
    ctx: UnsafeCell<I>,
}

// SAFETY: `ctx` is accessed exclusively from within `heart_beat`, which the
// caller must not call concurrently or reentrantly for a given subscriber
// (see the type-level docs on `Subscriber::heart_beat`).
unsafe impl<I: Send> Sync for InputPin<I> {}

struct InputSpec<I> {
    max_events: usize,
    max_payload: usize,
    read_mode: PopMode,
    ctx: I,
}

struct OutputSpec {
    max_clients: usize,
    max_events: usize,
    max_payload: usize,
}

/// Builder that accumulates input and output pin descriptors before a
/// [`Subscriber`] is created, in the same append-only shape as
/// [`crate::PublisherInitializer`].
pub struct SubscriberInitializer<C, I> {
    step: StepCallback<C, I>,
    inputs: Vec<InputSpec<I>>,
    outputs: Vec<OutputSpec>,
}

impl<C, I> SubscriberInitializer<C, I> {
    pub fn new(step: StepCallback<C, I>) -> Self {
        Self {
            step,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Registers one input pin. Returns the pin index it will be assigned.
    pub fn add_input(
        &mut self,
        max_events: usize,
        max_payload: usize,
        read_mode: PopMode,
        ctx: I,
    ) -> usize {
        let id = self.inputs.len();
        self.inputs.push(InputSpec {
            max_events,
            max_payload,
            read_mode,
            ctx,
        });
        id
    }

    /// Registers one output pin. Returns the pin index it will be assigned.
    pub fn add_output(&mut self, max_clients: usize, max_events: usize, max_payload: usize) -> usize {
        let id = self.outputs.len();
        self.outputs.push(OutputSpec {
            max_clients,
            max_events,
            max_payload,
        });
        id
    }
}

/// RT Subscriber façade: a fixed array of input message boxes, a fixed
/// array of output message boxes, and a single step callback dispatched
/// once per delivered input event.
///
/// `heart_beat` is the tick-context entry point: for each input pin, it
/// drains (or peeks, under [`PopMode::Latest`]) pending events and invokes
/// the step callback, which typically calls [`Subscriber::output_write`]
/// to forward downstream. `input_write` is the entry point for external
/// writers (e.g. a network receive thread) publishing into an input pin;
/// `output_read`/`output_write` are for out-of-tick application-side
/// readers and writers of the output pins.
pub struct Subscriber<C, I> {
    inputs: Box<[InputPin<I>]>,
    outputs: Box<[Mbx]>,
    step: StepCallback<C, I>,
    tick_in_progress: AtomicBool,
}

impl<C, I> Subscriber<C, I> {
    /// Allocates every input/output message box accumulated in `init`.
    pub fn initialize(init: SubscriberInitializer<C, I>) -> Result<Self> {
        if init.inputs.is_empty() && init.outputs.is_empty() {
            return Err(PubSubError::BadArg("at least one input or output must be registered"));
        }

        let mut inputs = Vec::with_capacity(init.inputs.len());
        for spec in init.inputs {
            let mbx = Mbx::new(1, spec.max_events, spec.max_payload)?;
            inputs.push(InputPin {
                mbx,
                read_mode: spec.read_mode,
                ctx: UnsafeCell::new(spec.ctx),
            });
        }

        let mut outputs = Vec::with_capacity(init.outputs.len());
        for spec in init.outputs {
            outputs.push(Mbx::new(spec.max_clients, spec.max_events, spec.max_payload)?);
        }

        Ok(Self {
            inputs: inputs.into_boxed_slice(),
            outputs: outputs.into_boxed_slice(),
            step: init.step,
            tick_in_progress: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn check_input(&self, pin: usize) -> Result<()> {
        if pin >= self.inputs.len() {
            return Err(PubSubError::BadPin {
                id: pin,
                count: self.inputs.len(),
            });
        }
        Ok(())
    }

    fn check_output(&self, pin: usize) -> Result<()> {
        if pin >= self.outputs.len() {
            return Err(PubSubError::BadPin {
                id: pin,
                count: self.outputs.len(),
            });
        }
        Ok(())
    }

    /// Entry point for external writers publishing into input pin `pin`
    /// (e.g. a network receive thread decoding an incoming message).
    pub fn input_write(&self, pin: usize, bytes: &[u8]) -> Result<u64> {
        self.check_input(pin)?;
        Ok(self.inputs[pin].mbx.push(bytes)?)
    }

    /// Copy-path publish into output pin `pin`.
    pub fn output_write(&self, pin: usize, bytes: &[u8]) -> Result<u64> {
        self.check_output(pin)?;
        Ok(self.outputs[pin].push(bytes)?)
    }

    /// Zero-copy publish into output pin `pin`.
    pub fn output_write_begin(&self, pin: usize, len: usize) -> Result<WriteSession<'_>> {
        self.check_output(pin)?;
        Ok(self.outputs[pin].push_begin(len)?)
    }

    /// Out-of-tick read of output pin `pin` for `client`, under `mode`.
    /// The returned [`PopGuard`] holds the underlying read slot until
    /// dropped.
    pub fn output_read(&self, pin: usize, client: usize, mode: PopMode) -> Result<PopGuard<'_>> {
        self.check_output(pin)?;
        Ok(self.outputs[pin].pop(client, mode)?)
    }

    /// Unread event count for `client` on output pin `pin`, saturated at
    /// that pin's `max_events`.
    pub fn output_pending(&self, pin: usize, client: usize) -> Result<u64> {
        self.check_output(pin)?;
        Ok(self.outputs[pin].pending(client)?)
    }

    /// Drains (or, under [`PopMode::Latest`], peeks) every input pin once
    /// and dispatches the step callback for each event obtained. Not
    /// reentrant: a call from within a dispatched callback returns
    /// [`PubSubError::InvalidState`]. Continues processing every input
    /// regardless of per-input errors, returning the first one
    /// encountered (excluding the ordinary end-of-events condition).
    pub fn heart_beat(&self, global_ctx: &mut C) -> Result<()> {
        let was_in_progress = self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if was_in_progress {
            return Err(PubSubError::InvalidState);
        }

        let mut first_error = None;
        for (i, input) in self.inputs.iter().enumerate() {
            // SAFETY: `heart_beat` holds exclusive tick-thread access,
            // enforced by `tick_in_progress` above; no other call touches
            // this input's `ctx` concurrently.
            let ctx = unsafe { &mut *input.ctx.get() };
            loop {
                match input.mbx.pop(0, input.read_mode) {
                    Ok(ev) => {
                        (self.step)(self, global_ctx, ctx, i, ev.bytes());
                    }
                    Err(MbxError::Empty) => break,
                    Err(e) => {
                        first_error.get_or_insert(PubSubError::from(e));
                        break;
                    }
                }
                if input.read_mode == PopMode::Latest {
                    break;
                }
            }
        }

        self.tick_in_progress.store(false, Ordering::Release);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
