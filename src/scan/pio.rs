//! PIO + DMA scan backend for the RP2040 and RP2350.
//!
//! State machine 0 runs the column-shift program and state machine 1 the row-control
//! program of one PIO block; PIO flags 4 and 5 carry the handshake.
//!
//! Each sequencer is fed by a pair of DMA channels. The data channel moves one 32-byte ring
//! window (one scan frame) into the TX FIFO, paced by the FIFO's DREQ, then chains to its
//! reload channel. The reload channel copies the engine's reload word into the data
//! channel's read address and chains back, which restarts the data channel with a fresh
//! transfer count. The pair runs forever without the CPU, and a new source written to the
//! reload word is picked up at the next frame boundary.
//!
//! # Example
//!
//! ```no_run
//! # #![no_std]
//! # #![no_main]
//! # use panic_probe as _;
//! # use core::convert::Infallible;
//! # use core::default::Default;
//! use embassy_rp::peripherals::PIO0;
//! use embassy_rp::pio::Pio;
//! use shift_matrix::{
//!     Result,
//!     config::MatrixConfig,
//!     framebuffer::Framebuffer,
//!     matrix::{LedMatrix, MatrixStatic},
//!     scan::pio::{DmaChannels, MatrixPio, PioScan},
//! };
//!
//! static MATRIX_STATIC: MatrixStatic = MatrixStatic::new_static();
//!
//! # #[embassy_executor::main]
//! # async fn main(_spawner: embassy_executor::Spawner) -> ! {
//! #     let err = example().await.unwrap_err();
//! #     core::panic!("{err}");
//! # }
//! async fn example() -> Result<Infallible> {
//!     let p = embassy_rp::init(Default::default());
//!     let mut pio = Pio::new(p.PIO0, PIO0::irqs());
//!     let data = pio.common.make_pio_pin(p.PIN_0);
//!     let clock = pio.common.make_pio_pin(p.PIN_1);
//!     let latch = pio.common.make_pio_pin(p.PIN_2);
//!     let rows = [
//!         pio.common.make_pio_pin(p.PIN_8),
//!         pio.common.make_pio_pin(p.PIN_9),
//!         pio.common.make_pio_pin(p.PIN_10),
//!         pio.common.make_pio_pin(p.PIN_11),
//!         pio.common.make_pio_pin(p.PIN_12),
//!         pio.common.make_pio_pin(p.PIN_13),
//!         pio.common.make_pio_pin(p.PIN_14),
//!         pio.common.make_pio_pin(p.PIN_15),
//!     ];
//!     let channels = DmaChannels::new(p.DMA_CH0, p.DMA_CH1, p.DMA_CH2, p.DMA_CH3);
//!     let scan = PioScan::new(pio, data, clock, latch, rows, Some(channels), MatrixConfig::new())?;
//!     let mut matrix = LedMatrix::new(scan, MATRIX_STATIC.arena()?)?;
//!
//!     let mut frame = Framebuffer::new();
//!     frame.set_pixel(0, 0, true);
//!     matrix.start(Some(&frame))?;
//!     core::future::pending().await // scans forever with no CPU involvement
//! }
//! ```

use core::sync::atomic::{Ordering, compiler_fence};

use defmt::{debug, info, trace};
use embassy_rp::Peri;
use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::dma::{AnyChannel, Channel};
use embassy_rp::gpio::Level;
use embassy_rp::pac;
use embassy_rp::pac::dma::regs::CtrlTrig;
use embassy_rp::pac::dma::vals::{DataSize, TreqSel};
use embassy_rp::pio::{
    Common, Config, Direction, FifoJoin, Instance, InterruptHandler, Pin, Pio, ShiftConfig,
    ShiftDirection, StateMachine,
};
use fixed::FixedU32;
use fixed::types::extra::U8;

use crate::config::{FeedMode, MatrixConfig, clock_divider_bits};
use crate::framebuffer::ROWS;
use crate::ring_buffer::{RING_BYTES, RING_WORDS};
use crate::scan::{
    LATCH_DONE_FLAG, ROW_READY_FLAG, RingCursor, ScanBackend, ScanMemory, SourceBuffer,
    StreamDescriptor,
};
use crate::{Error, Resource, Result};

const COLUMN_SM: u8 = 0;
const ROW_SM: u8 = 1;
const HANDSHAKE_FLAGS: u8 = (1 << ROW_READY_FLAG) | (1 << LATCH_DONE_FLAG);

// Low address bits that select the word inside a ring window.
const RING_OFFSET_MASK: u32 = RING_BYTES as u32 - 1;

/// PIO blocks that can host the matrix scan.
///
/// Implemented for every PIO block on the selected chip.
pub trait MatrixPio: Instance {
    /// The interrupt binding type for this PIO.
    type Irqs: embassy_rp::interrupt::typelevel::Binding<
            <Self as Instance>::Interrupt,
            InterruptHandler<Self>,
        >;

    /// DREQ number of this block's state machine 0 TX FIFO.
    const TX_DREQ_BASE: u8;

    /// The interrupt configuration.
    fn irqs() -> Self::Irqs;

    /// Bus address of state machine `sm`'s TX FIFO.
    fn tx_fifo_address(sm: u8) -> u32;
}

impl MatrixPio for embassy_rp::peripherals::PIO0 {
    type Irqs = crate::pio_irqs::Pio0Irqs;
    const TX_DREQ_BASE: u8 = 0;

    fn irqs() -> Self::Irqs {
        crate::pio_irqs::Pio0Irqs
    }

    fn tx_fifo_address(sm: u8) -> u32 {
        pac::PIO0.txf(usize::from(sm)).as_ptr() as u32
    }
}

impl MatrixPio for embassy_rp::peripherals::PIO1 {
    type Irqs = crate::pio_irqs::Pio1Irqs;
    const TX_DREQ_BASE: u8 = 8;

    fn irqs() -> Self::Irqs {
        crate::pio_irqs::Pio1Irqs
    }

    fn tx_fifo_address(sm: u8) -> u32 {
        pac::PIO1.txf(usize::from(sm)).as_ptr() as u32
    }
}

#[cfg(feature = "pico2")]
impl MatrixPio for embassy_rp::peripherals::PIO2 {
    type Irqs = crate::pio_irqs::Pio2Irqs;
    const TX_DREQ_BASE: u8 = 16;

    fn irqs() -> Self::Irqs {
        crate::pio_irqs::Pio2Irqs
    }

    fn tx_fifo_address(sm: u8) -> u32 {
        pac::PIO2.txf(usize::from(sm)).as_ptr() as u32
    }
}

/// The DMA feeder's channels: a data channel and its reload channel for columns, and the
/// same pair for row patterns.
pub struct DmaChannels<'d> {
    column: StreamChannels<'d>,
    row: StreamChannels<'d>,
}

impl<'d> DmaChannels<'d> {
    /// Claims four channels for the scan.
    #[must_use]
    pub fn new(
        column: Peri<'d, impl Channel>,
        column_reload: Peri<'d, impl Channel>,
        row: Peri<'d, impl Channel>,
        row_reload: Peri<'d, impl Channel>,
    ) -> Self {
        Self {
            column: StreamChannels {
                data: column.into(),
                reload: column_reload.into(),
            },
            row: StreamChannels {
                data: row.into(),
                reload: row_reload.into(),
            },
        }
    }

    fn abort(&self) {
        let channels = [
            &self.column.data,
            &self.column.reload,
            &self.row.data,
            &self.row.reload,
        ];
        // Disable every channel first so no chain trigger restarts one mid-abort.
        let mut mask = 0;
        for channel in channels {
            channel.regs().al1_ctrl().modify(|ctrl| {
                let mut disabled = CtrlTrig(*ctrl);
                disabled.set_en(false);
                *ctrl = disabled.0;
            });
            mask |= 1 << channel.number();
        }
        pac::DMA.chan_abort().write(|abort| abort.set_chan_abort(mask));
        for channel in channels {
            while channel.regs().ctrl_trig().read().busy() {}
        }
        compiler_fence(Ordering::SeqCst);
    }
}

struct StreamChannels<'d> {
    data: Peri<'d, AnyChannel>,
    reload: Peri<'d, AnyChannel>,
}

impl StreamChannels<'_> {
    /// Programs the reload channel, then triggers the data channel.
    fn start(&self, stream: &StreamDescriptor, destination: u32, dreq: u8) {
        let data = self.data.regs();
        let reload = self.reload.regs();
        reload.read_addr().write_value(stream.reload as u32);
        reload
            .write_addr()
            .write_value(data.read_addr().as_ptr() as u32);
        write_transfer_count(reload, 1);
        reload.al1_ctrl().write_value(reload_control(&self.data).0);

        data.read_addr().write_value(stream.source.address as u32);
        data.write_addr().write_value(destination);
        write_transfer_count(data, RING_WORDS as u32);
        compiler_fence(Ordering::SeqCst);
        data.ctrl_trig()
            .write_value(data_control(&self.reload, stream, dreq));
    }

    /// Whether the data channel's current pass reads the ring at `address`.
    fn reads(&self, address: usize) -> bool {
        self.data.regs().read_addr().read() & !RING_OFFSET_MASK == address as u32
    }
}

/// Column-shift and row-control programs on one PIO block, fed by DMA or by the CPU.
pub struct PioScan<'d, PIO: MatrixPio> {
    config: MatrixConfig,
    common: Common<'d, PIO>,
    column_sm: StateMachine<'d, PIO, 0>,
    row_sm: StateMachine<'d, PIO, 1>,
    column_config: Config<'d, PIO>,
    row_config: Config<'d, PIO>,
    column_pins: [Pin<'d, PIO>; 3],
    row_pins: [Pin<'d, PIO>; ROWS],
    channels: Option<DmaChannels<'d>>,
    column_cursor: RingCursor,
    row_cursor: RingCursor,
}

impl<'d, PIO: MatrixPio> PioScan<'d, PIO> {
    /// Loads both programs into `pio` and configures state machines 0 and 1.
    ///
    /// `rows[r]` drives row `r` (active low); the eight row pins must be consecutive GPIOs.
    /// `channels` is required for [`FeedMode::Dma`] and ignored for
    /// [`FeedMode::Polling`].
    ///
    /// # Errors
    ///
    /// [`Error::PinsNotConsecutive`], [`Error::SequencerClockOutOfRange`], or
    /// [`Error::ResourceExhausted`] when DMA feeding is configured without channels.
    pub fn new(
        pio: Pio<'d, PIO>,
        data: Pin<'d, PIO>,
        clock: Pin<'d, PIO>,
        latch: Pin<'d, PIO>,
        rows: [Pin<'d, PIO>; ROWS],
        channels: Option<DmaChannels<'d>>,
        config: MatrixConfig,
    ) -> Result<Self> {
        if config.feed == FeedMode::Dma && channels.is_none() {
            return Err(Error::ResourceExhausted {
                resource: Resource::DmaChannel,
            });
        }
        let first_row = check_consecutive(&rows)?;
        let divider = FixedU32::<U8>::from_bits(clock_divider_bits(
            clk_sys_freq(),
            config.sequencer_hz,
        )?);

        let Pio {
            mut common,
            sm0: mut column_sm,
            sm1: mut row_sm,
            ..
        } = pio;

        let column_program = ::pio::pio_asm!(
            ".side_set 1",
            ".wrap_target",
            "    wait 1 irq 4   side 0", // rows are off
            "    pull block     side 0",
            "    set x, 31      side 0",
            "shift:",
            "    out pins, 1    side 0", // data while clock low
            "    jmp x-- shift  side 1", // rising edge
            "    set pins, 1    side 0 [2]",
            "    set pins, 0    side 0",
            "    irq 5          side 0", // latched
            ".wrap",
        );
        let row_program = ::pio::pio_asm!(
            "    pull block", // dwell, pushed before the row stream starts
            "    mov y, osr",
            ".wrap_target",
            "    mov pins, ~null", // all rows off
            "    pull block",
            "    irq 4",
            "    wait 1 irq 5",
            "    out pins, 8",
            "    mov x, y",
            "dwell:",
            "    jmp x-- dwell",
            ".wrap",
        );

        let column_config = {
            let mut cfg = Config::default();
            cfg.use_program(&common.load_program(&column_program.program), &[&clock]);
            cfg.set_out_pins(&[&data]);
            cfg.set_set_pins(&[&latch]);
            cfg.clock_divider = divider;
            cfg.shift_out = ShiftConfig {
                auto_fill: false,
                threshold: 32,
                direction: ShiftDirection::Left,
            };
            cfg.fifo_join = FifoJoin::TxOnly;
            cfg
        };
        let row_config = {
            let row_refs = rows.each_ref();
            let mut cfg = Config::default();
            cfg.use_program(&common.load_program(&row_program.program), &[]);
            cfg.set_out_pins(&row_refs);
            cfg.clock_divider = divider;
            cfg.shift_out = ShiftConfig {
                auto_fill: false,
                threshold: 32,
                direction: ShiftDirection::Right,
            };
            cfg.fifo_join = FifoJoin::TxOnly;
            cfg
        };

        column_sm.set_pin_dirs(Direction::Out, &[&data, &clock, &latch]);
        column_sm.set_pins(Level::Low, &[&data, &clock, &latch]);
        let row_refs = rows.each_ref();
        row_sm.set_pin_dirs(Direction::Out, &row_refs);
        row_sm.set_pins(Level::High, &row_refs);

        info!(
            "PioScan::new: rows from GPIO {}, divider {=u32}/256, {} feed",
            first_row,
            divider.to_bits(),
            config.feed
        );
        Ok(Self {
            config,
            common,
            column_sm,
            row_sm,
            column_config,
            row_config,
            column_pins: [data, clock, latch],
            row_pins: rows,
            channels,
            column_cursor: RingCursor::idle(),
            row_cursor: RingCursor::idle(),
        })
    }

    fn dma_channels(&self) -> Option<&DmaChannels<'d>> {
        match self.config.feed {
            FeedMode::Dma => self.channels.as_ref(),
            FeedMode::Polling => None,
        }
    }

    fn top_up(&mut self, memory: &ScanMemory<'_>) {
        let column_tx = self.column_sm.tx();
        self.column_cursor
            .feed(memory, |word| column_tx.try_push(word));
        let row_tx = self.row_sm.tx();
        self.row_cursor.feed(memory, |word| row_tx.try_push(word));
    }
}

impl<PIO: MatrixPio> ScanBackend for PioScan<'_, PIO> {
    fn config(&self) -> &MatrixConfig {
        &self.config
    }

    fn arm(
        &mut self,
        columns: &StreamDescriptor,
        rows: &StreamDescriptor,
        memory: &ScanMemory<'_>,
    ) -> Result<()> {
        self.column_sm.set_enable(false);
        self.row_sm.set_enable(false);
        self.column_sm.restart();
        self.row_sm.restart();
        self.column_sm.clear_fifos();
        self.row_sm.clear_fifos();
        // Applying the config also jumps each machine back to its program origin.
        self.column_sm.set_config(&self.column_config);
        self.row_sm.set_config(&self.row_config);
        self.common.clear_irqs(HANDSHAKE_FLAGS);
        self.row_sm
            .tx()
            .push(self.config.dwell_cycles.saturating_sub(1));

        if let Some(channels) = self.dma_channels() {
            channels.column.start(
                columns,
                PIO::tx_fifo_address(COLUMN_SM),
                PIO::TX_DREQ_BASE + COLUMN_SM,
            );
            channels.row.start(
                rows,
                PIO::tx_fifo_address(ROW_SM),
                PIO::TX_DREQ_BASE + ROW_SM,
            );
            debug!(
                "PioScan::arm: DMA {}+{} -> SM{}, DMA {}+{} -> SM{}",
                channels.column.data.number(),
                channels.column.reload.number(),
                COLUMN_SM,
                channels.row.data.number(),
                channels.row.reload.number(),
                ROW_SM
            );
        } else {
            self.column_cursor = RingCursor::armed(columns.source.id);
            self.row_cursor = RingCursor::armed(rows.source.id);
            self.top_up(memory);
        }
        Ok(())
    }

    fn start_sequencers(&mut self) {
        // Row control first: the column program idles until the first row-ready flag.
        self.row_sm.set_enable(true);
        self.column_sm.set_enable(true);
    }

    fn halt_sequencers(&mut self) -> Result<()> {
        self.column_sm.set_enable(false);
        self.row_sm.set_enable(false);
        let row_refs = self.row_pins.each_ref();
        self.row_sm.set_pins(Level::High, &row_refs);
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(channels) = self.dma_channels() {
            channels.abort();
        }
        self.column_cursor = RingCursor::idle();
        self.row_cursor = RingCursor::idle();
    }

    fn redirect_columns(&mut self, source: SourceBuffer) {
        if self.dma_channels().is_some() {
            // The reload channel reads the new source at the next frame boundary.
            trace!("PioScan::redirect_columns: {=usize:#x} from next frame", source.address);
        } else {
            self.column_cursor.redirect(source.id);
        }
    }

    fn settle_columns(&mut self, retired: SourceBuffer, memory: &ScanMemory<'_>) -> Result<()> {
        if let Some(channels) = self.dma_channels() {
            while channels.column.reads(retired.address) {}
        } else {
            while self.column_cursor.reads(retired.id) {
                self.top_up(memory);
            }
        }
        Ok(())
    }

    fn refill(&mut self, memory: &ScanMemory<'_>) -> Result<()> {
        if self.dma_channels().is_none() {
            self.top_up(memory);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.column_sm.set_enable(false);
        self.row_sm.set_enable(false);
        if let Some(channels) = &self.channels {
            channels.abort();
        }
        self.column_cursor = RingCursor::idle();
        self.row_cursor = RingCursor::idle();
        let column_refs = self.column_pins.each_ref();
        self.column_sm.set_pins(Level::Low, &column_refs);
        info!("PioScan::release: state machines and DMA channels idle");
    }
}

/// Returns the GPIO number of row 0.
fn check_consecutive<PIO: Instance>(rows: &[Pin<'_, PIO>; ROWS]) -> Result<u8> {
    let [first, ..] = rows;
    let base = first.pin();
    let consecutive = rows
        .iter()
        .zip(0u8..)
        .all(|(pin, offset)| base.checked_add(offset) == Some(pin.pin()));
    if consecutive {
        Ok(base)
    } else {
        Err(Error::PinsNotConsecutive)
    }
}

fn data_control(reload: &Peri<'_, AnyChannel>, stream: &StreamDescriptor, dreq: u8) -> CtrlTrig {
    let mut ctrl = CtrlTrig(0);
    ctrl.set_data_size(DataSize::SIZE_WORD);
    ctrl.set_incr_read(true);
    ctrl.set_incr_write(false);
    // Wrap the read address.
    ctrl.set_ring_sel(false);
    ctrl.set_ring_size(stream.ring_size_bits);
    ctrl.set_treq_sel(TreqSel::from_bits(dreq));
    ctrl.set_chain_to(reload.number());
    ctrl.set_irq_quiet(true);
    ctrl.set_en(true);
    ctrl
}

fn reload_control(data: &Peri<'_, AnyChannel>) -> CtrlTrig {
    let mut ctrl = CtrlTrig(0);
    ctrl.set_data_size(DataSize::SIZE_WORD);
    // Always the same word, always into the data channel's read address.
    ctrl.set_incr_read(false);
    ctrl.set_incr_write(false);
    ctrl.set_treq_sel(TreqSel::PERMANENT);
    // Restarts the data channel, which reloads its transfer count.
    ctrl.set_chain_to(data.number());
    ctrl.set_irq_quiet(true);
    ctrl.set_en(true);
    ctrl
}

#[cfg(feature = "pico1")]
fn write_transfer_count(regs: pac::dma::Channel, count: u32) {
    regs.trans_count().write_value(count);
}

#[cfg(feature = "pico2")]
fn write_transfer_count(regs: pac::dma::Channel, count: u32) {
    // MODE = NORMAL: the count is reloaded on every trigger.
    regs.trans_count().write(|trans| trans.set_count(count));
}
