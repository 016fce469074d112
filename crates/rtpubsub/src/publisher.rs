use std::marker::PhantomData;

use rtpubsub_irt::{DataHandle, InstanceConfig, Irt};

use crate::error::{PubSubError, Result};

/// Identifies one message registered with a [`Publisher`]. Assigned
/// sequentially by [`PublisherInitializer::add_message`], matching the
/// order messages were added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub(crate) usize);

impl MessageId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

struct MessageDescriptor<C> {
    cfg: InstanceConfig<C>,
}

/// Append-only builder that accumulates per-message descriptors before a
/// [`Publisher`] is created. Mirrors the assign-on-registration shape the
/// teacher workspace uses for producer ids, generalized to a pre-creation
/// builder because the message table here is frozen before the underlying
/// [`Irt`] exists, rather than grown as producers register at runtime.
pub struct PublisherInitializer<C> {
    max_message_size: usize,
    messages: Vec<MessageDescriptor<C>>,
}

impl<C> PublisherInitializer<C> {
    /// Starts a builder for messages of up to `max_message_size` bytes
    /// each; every message registered with this initializer shares that
    /// bound.
    pub fn new(max_message_size: usize) -> Result<Self> {
        if max_message_size == 0 {
            return Err(PubSubError::BadArg("max_message_size must be >= 1"));
        }
        Ok(Self {
            max_message_size,
            messages: Vec::new(),
        })
    }

    /// Registers one message descriptor and returns the [`MessageId`] it
    /// will be assigned once [`Publisher::initialize`] runs.
    pub fn add_message(
        &mut self,
        period: u32,
        offset: u32,
        initial_enabled: bool,
        cb_start: Option<fn(u32, &mut C)>,
        cb_send: Option<fn(u32, &mut C, &[u8])>,
        cb_stop: Option<fn(u32, &mut C)>,
    ) -> MessageId {
        let id = MessageId(self.messages.len());
        self.messages.push(MessageDescriptor {
            cfg: InstanceConfig {
                period,
                offset,
                enabled: initial_enabled,
                cb_start,
                cb_elapsed: cb_send,
                cb_stop,
            },
        });
        id
    }

    #[inline]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// RT Publisher façade: one [`Irt`] instance per registered message, each
/// publishing its payload through a zero-copy data handle. `heart_beat`
/// forwards directly to [`Irt::update`] and is intended to be called from
/// the RT tick thread at a fixed cadence; every other method is safe to
/// call from any application thread.
pub struct Publisher<C> {
    irt: Irt<C>,
    max_message_size: usize,
    _marker: PhantomData<fn(&mut C)>,
}

impl<C> Publisher<C> {
    /// Allocates the timer array and registers every message accumulated
    /// in `init`, in the order they were added.
    pub fn initialize(init: PublisherInitializer<C>) -> Result<Self> {
        if init.messages.is_empty() {
            return Err(PubSubError::BadArg("at least one message must be registered"));
        }

        let irt = Irt::new(init.messages.len(), init.max_message_size)?;
        irt.initialize()?;
        for (id, desc) in init.messages.into_iter().enumerate() {
            irt.instance_init(id, desc.cfg)?;
        }

        Ok(Self {
            irt,
            max_message_size: init.max_message_size,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn message_count(&self) -> usize {
        self.irt.n_instances()
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn check_id(&self, id: MessageId) -> Result<usize> {
        if id.0 >= self.irt.n_instances() {
            return Err(PubSubError::BadPin {
                id: id.0,
                count: self.irt.n_instances(),
            });
        }
        Ok(id.0)
    }

    /// Whether `id` is currently enabled, as observed by the tick thread.
    pub fn get_message_status(&self, id: MessageId) -> Result<bool> {
        let idx = self.check_id(id)?;
        Ok(self.irt.instance_last_status(idx)?)
    }

    pub fn start_message(&self, id: MessageId) -> Result<()> {
        let idx = self.check_id(id)?;
        Ok(self.irt.instance_start(idx)?)
    }

    pub fn stop_message(&self, id: MessageId) -> Result<()> {
        let idx = self.check_id(id)?;
        Ok(self.irt.instance_stop(idx)?)
    }

    pub fn set_message_period(&self, id: MessageId, period: u32) -> Result<()> {
        let idx = self.check_id(id)?;
        Ok(self.irt.instance_set_period(idx, period)?)
    }

    pub fn set_message_offset(&self, id: MessageId, offset: u32) -> Result<()> {
        let idx = self.check_id(id)?;
        Ok(self.irt.instance_set_offset(idx, offset)?)
    }

    /// Copy-path value update: publishes `bytes` as the message's new
    /// payload, taken into account by the next `heart_beat`.
    pub fn set_message_value(&self, id: MessageId, bytes: &[u8]) -> Result<()> {
        let idx = self.check_id(id)?;
        if bytes.len() > self.max_message_size {
            return Err(PubSubError::Overflow {
                max: self.max_message_size,
                got: bytes.len(),
            });
        }
        Ok(self.irt.instance_set_data(idx, bytes)?)
    }

    /// Zero-copy path: opens a scoped write session over the message's
    /// payload buffer. Commit or cancel by calling [`WriteView::release`].
    pub fn get_buffer(&self, id: MessageId) -> Result<WriteView<'_, C>> {
        let idx = self.check_id(id)?;
        Ok(WriteView {
            handle: self.irt.handle_init(idx)?,
        })
    }

    /// Forwards one external tick to the underlying [`Irt`], dispatching
    /// `cb_start`/`cb_send`/`cb_stop` synchronously for every message that
    /// warrants it. Not reentrant: must be called from a single RT thread.
    pub fn heart_beat(&self, external_tick: u32, ctx: &mut C) -> Result<()> {
        Ok(self.irt.update(external_tick, ctx)?)
    }
}

/// Scoped zero-copy write session over one message's payload, opened by
/// [`Publisher::get_buffer`]. Wraps an [`rtpubsub_irt::DataHandle`]; the
/// underlying timer instance stays held for the duration of the session,
/// preventing a concurrent `heart_beat` from observing a half-written
/// payload.
pub struct WriteView<'a, C> {
    handle: DataHandle<'a, C>,
}

impl<'a, C> WriteView<'a, C> {
    /// Returns `(payload buffer, max allowed size, current significant
    /// size)`.
    pub fn get(&mut self) -> (&mut [u8], usize, usize) {
        self.handle.get()
    }

    /// Records the significant length of the payload written so far.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        Ok(self.handle.set_new_size(len)?)
    }

    /// Commits the session unless `cancel` is set.
    pub fn release(self, cancel: bool) -> Result<()> {
        Ok(self.handle.end(cancel)?)
    }
}
