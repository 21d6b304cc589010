//! Audio graph: the master bus, its render side, and the engine clock.
//!
//! The graph is split in two halves connected by a command channel:
//!
//! - [`MasterBus`] lives on the control thread. Schedulers build reverb buses
//!   (with their voices already connected) and hand them over with
//!   [`MasterBus::attach_layer`]; volume changes go the same way.
//! - [`GraphRenderer`] lives wherever audio is pulled: a device callback, a
//!   browser AudioWorklet, or an offline loop. It owns every bus, drains
//!   pending commands at each block boundary, and advances the [`AudioClock`].
//!   Detached buses go back to the master bus so their memory is freed off the
//!   render thread.
//!
//! Rendering is done in fixed 128-frame blocks; callers may pull any number of
//! frames and the renderer carries partial blocks over between calls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{debug, trace};

use super::mixer::{MasterMixer, clamp_gain};
use super::reverb::ReverbBus;
use super::voice::VoiceId;

/// Frames per render block. Commands take effect on block boundaries.
pub const BLOCK_SIZE: usize = 128;

/// Id of a layer attached to the master bus.
pub type LayerId = u64;

/// Monotonic engine clock, shared between the render and control sides.
///
/// It counts rendered frames; time only moves while the renderer is pulled.
#[derive(Debug, Clone)]
pub struct AudioClock {
    sample_rate: f64,
    frames: Arc<AtomicU64>,
    live_voices: Arc<AtomicUsize>,
}

impl AudioClock {
    fn new(sample_rate: f64) -> Self {
        AudioClock {
            sample_rate,
            frames: Arc::new(AtomicU64::new(0)),
            live_voices: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Current time in seconds.
    pub fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }

    /// Voices still connected in the render graph after the last block.
    pub fn live_voices(&self) -> usize {
        self.live_voices.load(Ordering::Acquire)
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// A change to the render graph, applied at the next block boundary.
pub enum GraphCommand {
    /// Start rendering a layer's reverb bus (and the voices connected to it).
    AttachLayer { id: LayerId, name: String, bus: Box<ReverbBus> },
    /// Hard-disconnect a layer: its voices and tail stop immediately.
    DetachLayer(LayerId),
    SetMasterGain(f64),
}

/// A rendered layer: its name and reverb bus.
type LayerSlot = (String, Box<ReverbBus>);

/// Control side of the audio graph.
pub struct MasterBus {
    sender: Sender<GraphCommand>,
    detached: Receiver<LayerSlot>,
    clock: AudioClock,
    gain: f64,
    next_layer_id: AtomicU64,
    next_voice_id: AtomicU64,
}

/// Build a connected master bus / renderer pair at `sample_rate`.
pub fn audio_graph(sample_rate: f64, initial_gain: f64) -> (MasterBus, GraphRenderer) {
    let (sender, receiver) = mpsc::channel();
    let (retire, detached) = mpsc::channel();
    let clock = AudioClock::new(sample_rate);
    let gain = clamp_gain(initial_gain);

    let master = MasterBus {
        sender,
        detached,
        clock: clock.clone(),
        gain,
        next_layer_id: AtomicU64::new(0),
        next_voice_id: AtomicU64::new(0),
    };
    let renderer = GraphRenderer {
        receiver,
        retire,
        clock,
        layers: BTreeMap::new(),
        mixer: MasterMixer::new(gain),
        left: [0.0; BLOCK_SIZE],
        right: [0.0; BLOCK_SIZE],
        cursor: BLOCK_SIZE,
    };
    (master, renderer)
}

impl MasterBus {
    pub fn sample_rate(&self) -> f64 {
        self.clock.sample_rate()
    }

    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Last gain sent to the renderer.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Set the master gain, clamped to [0, 1]. Unramped.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = clamp_gain(gain);
        self.send(GraphCommand::SetMasterGain(self.gain));
    }

    /// Hand a finished bus to the renderer. Returns the id used to detach it.
    pub fn attach_layer(&self, name: &str, bus: ReverbBus) -> LayerId {
        let id = self.next_layer_id.fetch_add(1, Ordering::Relaxed);
        self.send(GraphCommand::AttachLayer {
            id,
            name: name.to_string(),
            bus: Box::new(bus),
        });
        id
    }

    /// A sender that outlives borrows of the bus, for layer handles.
    pub fn command_sender(&self) -> Sender<GraphCommand> {
        self.sender.clone()
    }

    pub fn next_voice_id(&self) -> VoiceId {
        self.next_voice_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Free the buses the renderer has detached since the last call.
    pub fn reclaim_detached(&self) -> usize {
        let mut freed = 0;
        for (name, mut bus) in self.detached.try_iter() {
            trace!(layer = %name, "free detached layer");
            bus.disconnect_all();
            freed += 1;
        }
        freed
    }

    fn send(&self, command: GraphCommand) {
        if self.sender.send(command).is_err() {
            debug!("renderer dropped; graph command discarded");
        }
    }
}

/// Render side of the audio graph.
pub struct GraphRenderer {
    receiver: Receiver<GraphCommand>,
    retire: Sender<LayerSlot>,
    clock: AudioClock,
    layers: BTreeMap<LayerId, LayerSlot>,
    mixer: MasterMixer,
    left: [f64; BLOCK_SIZE],
    right: [f64; BLOCK_SIZE],
    /// Next undelivered frame of the current block.
    cursor: usize,
}

impl GraphRenderer {
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn sample_rate(&self) -> f64 {
        self.clock.sample_rate()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.values().map(|(name, _)| name.as_str())
    }

    /// Fill two planar channel buffers. The shorter length wins.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        self.pull(frames, |i, l, r| {
            left[i] = l;
            right[i] = r;
        });
    }

    /// Fill an interleaved buffer with `channels` channels per frame.
    ///
    /// Mono output receives the average of both sides; channels beyond the
    /// second are left silent.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        self.pull(frames, |i, l, r| {
            let frame = &mut out[i * channels..(i + 1) * channels];
            if channels == 1 {
                frame[0] = 0.5 * (l + r);
            } else {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        });
    }

    fn pull(&mut self, frames: usize, mut emit: impl FnMut(usize, f32, f32)) {
        let mut written = 0;
        while written < frames {
            if self.cursor == BLOCK_SIZE {
                self.render_block();
                self.cursor = 0;
            }
            let n = (BLOCK_SIZE - self.cursor).min(frames - written);
            for k in 0..n {
                let c = self.cursor + k;
                emit(written + k, self.left[c] as f32, self.right[c] as f32);
            }
            self.cursor += n;
            written += n;
        }
    }

    fn render_block(&mut self) {
        self.apply_commands();

        let block_start = self.clock.frames();
        self.left.fill(0.0);
        self.right.fill(0.0);
        for (_, bus) in self.layers.values_mut() {
            bus.render_block(block_start, &mut self.left, &mut self.right);
        }
        self.mixer.process(&mut self.left, &mut self.right);

        let voices = self.layers.values().map(|(_, bus)| bus.voice_count()).sum();
        self.clock.live_voices.store(voices, Ordering::Release);
        self.clock.advance(BLOCK_SIZE as u64);
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                GraphCommand::AttachLayer { id, name, bus } => {
                    trace!(layer = %name, id, "attach layer");
                    self.layers.insert(id, (name, bus));
                }
                GraphCommand::DetachLayer(id) => {
                    if let Some(layer) = self.layers.remove(&id) {
                        trace!(layer = %layer.0, id, "detach layer");
                        // Dropped here only once the master bus is gone.
                        let _ = self.retire.send(layer);
                    }
                }
                GraphCommand::SetMasterGain(gain) => self.mixer.set_gain(gain),
            }
        }
    }
}
