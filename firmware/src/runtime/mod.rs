use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, OutputOpenDrain, Speed};
use static_cell::StaticCell;
use volume_core::{ControllerSettings, VolumeController};

use crate::clock::{self, FirmwareInstant};
use crate::lines::HardwareLines;
use crate::link::{HostQueue, ResponseQueue};
use crate::status;
use crate::usb;

mod control_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type Controller = VolumeController<HardwareLines<'static>, FirmwareInstant>;

pub(super) static HOST_QUEUE: HostQueue = HostQueue::new();
pub(super) static RESPONSE_QUEUE: ResponseQueue = ResponseQueue::new();
static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA4,
        PA5,
        PA6,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(hal::Config::default());

    let lines = HardwareLines::new(
        OutputOpenDrain::new(PA4, Level::High, Speed::Low),
        OutputOpenDrain::new(PA5, Level::High, Speed::Low),
        Output::new(PA6, Level::High, Speed::Low),
    );
    let mut controller = Controller::with_settings(lines, ControllerSettings::default());

    // Runs before USB enumerates so no host can observe the sweep.
    defmt::info!("boot: resync to default volume");
    let volume = controller.boot_sync(FirmwareInstant::now, |wait| {
        embassy_time::block_for(clock::to_embassy(wait));
    });
    status::record_volume(volume);
    defmt::info!("boot: volume={}", volume.get());

    if spawner.spawn(control_task::run(controller)).is_err() {
        defmt::error!("failed to spawn control task");
    }

    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    if spawner.spawn(usb_task::run(USB, PA12, PA11, storage)).is_err() {
        defmt::error!("failed to spawn USB task");
    }

    core::future::pending::<()>().await;
}
