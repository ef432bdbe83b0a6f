//! A simulated GRCAN core for driving a [`Channel`] from tests.
#![allow(dead_code)]

use grcan::bus::Channel;
use grcan::core::fugit::{HertzU32, RateExtU32};
use grcan::core::{CanId, Dependencies, RegisterAccess, StdSignal};
use grcan::generic_array::typenum::consts::*;
use grcan::interrupt::Interrupt;
use grcan::message::{FrameFormat, MAX_FRAME_SLOTS};
use grcan::messageram::{Capacities, Descriptor, SharedMemory, SLOT_SIZE};
use grcan::reg::{AccessRegisters, Reg, OFFSET_MASK};
use grcan::ring::{advance, available_to_write};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub enum Can0 {}

unsafe impl CanId for Can0 {
    const ADDRESS: *const () = 0x8000_0c00 as *const _;
}

/// Register file with the interrupt registers' side effects: `PICR` clears
/// bits of `PIR`, `PIMSR` reads `PIR & IMR`.
pub struct FakeRegisters {
    words: Mutex<[u32; 256]>,
    log: Mutex<Vec<(usize, u32)>>,
}

impl FakeRegisters {
    fn new() -> Self {
        Self {
            words: Mutex::new([0; 256]),
            log: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [u32; 256]> {
        self.words.lock().unwrap()
    }

    /// Set pending interrupts
    pub fn raise(&self, interrupts: u32) {
        self.lock()[Reg::Pir.offset() / 4] |= interrupts;
    }

    /// Values written to `reg` since the last call, oldest first
    pub fn take_writes(&self, reg: Reg) -> Vec<u32> {
        let mut log = self.log.lock().unwrap();
        let writes = log
            .iter()
            .filter(|(offset, _)| *offset == reg.offset())
            .map(|&(_, value)| value)
            .collect();
        log.retain(|(offset, _)| *offset != reg.offset());
        writes
    }
}

impl RegisterAccess for FakeRegisters {
    fn read(&self, offset: usize) -> u32 {
        let words = self.lock();
        if offset == Reg::Pimsr.offset() {
            words[Reg::Pir.offset() / 4] & words[Reg::Imr.offset() / 4]
        } else {
            words[offset / 4]
        }
    }

    fn write(&self, offset: usize, value: u32) {
        self.log.lock().unwrap().push((offset, value));
        let mut words = self.lock();
        if offset == Reg::Picr.offset() {
            words[Reg::Pir.offset() / 4] &= !value;
        } else {
            words[offset / 4] = value;
        }
    }
}

pub struct FakeDependencies {
    registers: FakeRegisters,
    clock: HertzU32,
    dma: bool,
}

impl FakeDependencies {
    pub fn new() -> Self {
        Self {
            registers: FakeRegisters::new(),
            clock: 50.MHz(),
            dma: true,
        }
    }

    /// The core cannot reach any memory
    pub fn without_dma() -> Self {
        Self {
            dma: false,
            ..Self::new()
        }
    }
}

unsafe impl Dependencies<Can0> for FakeDependencies {
    type Registers = FakeRegisters;
    type Signal = StdSignal;

    fn registers(&self) -> &FakeRegisters {
        &self.registers
    }

    fn core_clock(&self) -> HertzU32 {
        self.clock
    }

    fn dma_address(&self, address: *const ()) -> Option<u32> {
        self.dma.then_some(address as usize as u32)
    }
}

pub struct Eight;
impl Capacities for Eight {
    type RxSlots = U8;
    type TxSlots = U8;
}

pub struct Twelve;
impl Capacities for Twelve {
    type RxSlots = U12;
    type TxSlots = U12;
}

pub struct Sixteen;
impl Capacities for Sixteen {
    type RxSlots = U16;
    type TxSlots = U16;
}

pub type TestChannel<'a, C, F> = Channel<'a, Can0, FakeDependencies, C, F>;

pub fn open<C: Capacities, F: FrameFormat>(
    memory: &mut SharedMemory<C>,
) -> TestChannel<'_, C, F> {
    Channel::new(500.kHz(), FakeDependencies::new(), memory).unwrap()
}

/// `true` if moving an offset from `from` to `to` reaches `irq`
fn passes(from: u32, to: u32, irq: u32, size: u32) -> bool {
    let target = (irq + size - from) % size;
    let moved = (to + size - from) % size;
    target != 0 && target <= moved
}

/// The hardware side of a channel: fills the receive ring, drains the
/// transmit ring and raises interrupts, calling the channel's interrupt
/// handler like the interrupt controller would.
pub struct SimulatedCore<'c, 'a, C: Capacities, F: FrameFormat> {
    channel: &'c TestChannel<'a, C, F>,
}

impl<'c, 'a, C: Capacities, F: FrameFormat> SimulatedCore<'c, 'a, C, F> {
    pub fn new(channel: &'c TestChannel<'a, C, F>) -> Self {
        Self { channel }
    }

    pub fn regs(&self) -> &'c FakeRegisters {
        unsafe { self.channel.registers() }
    }

    fn interrupt(&self, interrupts: u32) {
        self.regs().raise(interrupts);
        self.channel.on_interrupt();
    }

    /// Store `frame` in the receive ring. Returns `false` if it does not fit.
    pub fn receive(&self, frame: &F::Frame) -> bool {
        let mut slots = [Descriptor::default(); MAX_FRAME_SLOTS];
        let n = F::encode(frame, &mut slots).unwrap();
        self.receive_raw(&slots[..n])
    }

    /// Store raw descriptors in the receive ring
    pub fn receive_raw(&self, descriptors: &[Descriptor]) -> bool {
        let regs = self.regs();
        let ring = unsafe { self.channel.rx_slots() };
        let size = (ring.len() * SLOT_SIZE) as u32;
        let read = regs.get(Reg::RxRd) & OFFSET_MASK;
        let write = regs.get(Reg::RxWr) & OFFSET_MASK;
        if descriptors.len() > available_to_write(read, write, size) as usize {
            return false;
        }
        for (i, descriptor) in descriptors.iter().enumerate() {
            ring[(write as usize / SLOT_SIZE + i) % ring.len()].set(*descriptor);
        }
        let new = advance(write, descriptors.len() as u32, size);
        regs.set(Reg::RxWr, new);
        let mut raised = u32::from(Interrupt::Received);
        if passes(write, new, regs.get(Reg::RxIrq) & OFFSET_MASK, size) {
            raised |= u32::from(Interrupt::RxPointer);
        }
        self.interrupt(raised);
        true
    }

    /// Send up to `max` frames from the transmit ring
    pub fn transmit(&self, max: usize) -> Vec<F::Frame> {
        let regs = self.regs();
        let ring = unsafe { self.channel.tx_slots() };
        let size = (ring.len() * SLOT_SIZE) as u32;
        let start = regs.get(Reg::TxRd) & OFFSET_MASK;
        let write = regs.get(Reg::TxWr) & OFFSET_MASK;
        let mut read = start;
        let mut sent = Vec::new();
        while sent.len() < max && read != write {
            let first = read as usize / SLOT_SIZE;
            let n = F::received_slots(&ring[first].get());
            let slots: Vec<Descriptor> =
                (0..n).map(|i| ring[(first + i) % ring.len()].get()).collect();
            sent.push(F::decode(&slots).unwrap());
            read = advance(read, n as u32, size);
        }
        if sent.is_empty() {
            return sent;
        }
        regs.set(Reg::TxRd, read);
        let mut raised = u32::from(Interrupt::Transmitted);
        if passes(start, read, regs.get(Reg::TxIrq) & OFFSET_MASK, size) {
            raised |= u32::from(Interrupt::TxPointer);
        }
        if read == write {
            raised |= u32::from(Interrupt::TxEmpty);
        }
        self.interrupt(raised);
        sent
    }

    /// Raise an interrupt without moving any offsets
    pub fn raise(&self, interrupt: Interrupt) {
        self.interrupt(interrupt.into());
    }

    /// Enter bus-off
    pub fn bus_off(&self) {
        let regs = self.regs();
        regs.modify(Reg::Stat, |stat| stat | 0x2);
        self.interrupt(Interrupt::BusOff.into());
    }

    /// Block until the driver has unmasked `interrupt`, i.e. a caller is
    /// about to wait for it.
    pub fn wait_until_armed(&self, interrupt: Interrupt) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.regs().get(Reg::Imr) & u32::from(interrupt) == 0 {
            assert!(Instant::now() < deadline, "{:?} never armed", interrupt);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
