use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::EndpointError;
use volume_core::presses::PressLine;
use volume_core::repl::ResponseLine;

use super::{HOST_QUEUE, RESPONSE_QUEUE};
use crate::link::{Assembled, HostMessage, LineAssembler};
use crate::status;
use crate::usb::{self, CdcAcmHandle, UsbDeviceStorage, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
    storage: &'static mut UsbDeviceStorage,
) -> ! {
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let (mut device, handle) = usb::build(driver, storage, UsbDeviceStrings::default());

    join(device.run(), run_interface(handle)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_interface<D>(handle: CdcAcmHandle<D>) -> !
where
    D: embassy_usb::driver::Driver<'static>,
{
    let CdcAcmHandle {
        mut sender,
        mut receiver,
        control,
    } = handle;
    let host = HOST_QUEUE.sender();
    let responses = RESPONSE_QUEUE.receiver();
    let mut ingress = [0u8; usb::PACKET_BUFFER_LEN];
    let mut assembler = LineAssembler::new();
    let mut pending_tx: Option<ResponseLine> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        assembler.clear();
        pending_tx = None;
        // Replies queued for a previous host are stale.
        while responses.try_receive().is_ok() {}

        host.send(HostMessage::Attached).await;
        defmt::info!(
            "usb: host attached volume={} syncing={} down={} up={}",
            status::volume().get(),
            status::indicator(),
            status::line_asserted(PressLine::Down),
            status::line_asserted(PressLine::Up)
        );

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    if pending_tx.is_none() {
                        pending_tx = Some(responses.receive().await);
                    }
                    if let Some(line) = pending_tx.as_ref() {
                        sender.write_packet(line.as_bytes()).await?;
                    }
                    pending_tx = None;
                    Ok::<(), EndpointError>(())
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(count)) => {
                    for byte in &ingress[..count] {
                        match assembler.feed(*byte) {
                            Some(Assembled::Line(frame)) => {
                                host.send(HostMessage::Command(frame)).await;
                            }
                            Some(Assembled::Overflow) => {
                                defmt::warn!("usb: dropping overlong command line");
                            }
                            None => {}
                        }
                    }
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: interface disabled");
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: read error");
                }
                Either3::Second(Ok(())) => {}
                Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: write disabled");
                    break;
                }
                Either3::Second(Err(_)) => {
                    defmt::warn!("usb: write error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: host dropped DTR");
                        break;
                    }
                }
            }
        }

        pending_tx = None;
        host.send(HostMessage::Detached).await;
    }
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &Sender<'static, D>)
where
    D: embassy_usb::driver::Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}
