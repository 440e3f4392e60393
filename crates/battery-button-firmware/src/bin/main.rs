#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use battery_button_core::clock::{Clock, PhaseTimer};
use battery_button_core::cycle::WakeCycle;
use battery_button_core::identity::DeviceIdentity;
use battery_button_core::messaging::{MessagingClient, SessionCredentials};
use battery_button_core::network::{PollSchedule, acquire_network};
use battery_button_core::power::PowerReporter;
use battery_button_firmware::mqtt_session::{BrokerEndpoint, EmbassyNetTransport, MqttSession};
use battery_button_firmware::platform::{EmbassyClock, deep_sleep};
use battery_button_firmware::secrets;
use battery_button_firmware::supply::AdcSupply;
use battery_button_firmware::wifi_link::EspWifiLink;
use embassy_executor::Spawner;
use embassy_futures::select::{Either3, select3};
use embassy_net::{Config as NetConfig, StackResources};
use embassy_time::{Delay, Instant};
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;

#[cfg(not(feature = "update-mode"))]
use battery_button_core::setup::NoSetupMode;
#[cfg(feature = "update-mode")]
use battery_button_core::setup::UpdateMode;
#[cfg(feature = "status-led")]
use battery_button_core::setup::StatusLed;
#[cfg(feature = "update-mode")]
use battery_button_firmware::ota::OtaSink;
#[cfg(feature = "update-mode")]
use battery_button_core::update::{self, UpdateEndpoint};
#[cfg(feature = "update-mode")]
use battery_button_firmware::update_server::{Endpoint, UpdateBuffers, UpdateServer, serve_updates};
#[cfg(feature = "update-mode")]
use esp_hal::gpio::{Input, InputConfig, Pull};
#[cfg(feature = "status-led")]
use esp_hal::gpio::{Level, Output, OutputConfig};
#[cfg(feature = "update-mode")]
use esp_storage::FlashStorage;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const MQTT_BUFFER_LEN: usize = 1024;
const LOG_LEVEL: LevelFilter = if cfg!(feature = "debug-log") {
    LevelFilter::Info
} else {
    LevelFilter::Off
};

static IDENTITY: StaticCell<DeviceIdentity> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
// DHCP, DNS, MQTT, HTTP, mDNS and one spare
static STACK_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
static MQTT_TCP_RX: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();
static MQTT_TCP_TX: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();
static MQTT_READ: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();
static MQTT_WRITE: StaticCell<[u8; MQTT_BUFFER_LEN]> = StaticCell::new();
#[cfg(feature = "update-mode")]
static UPDATE_BUFFERS: StaticCell<UpdateBuffers> = StaticCell::new();
#[cfg(feature = "update-mode")]
static UPDATE_ENDPOINT: StaticCell<Endpoint> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(LOG_LEVEL);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut rtc = Rtc::new(peripherals.LPWR);

    let config = secrets::config();
    if let Err(e) = config.validate() {
        warn!("Configuration incomplete: {}", e);
    }

    let mac = Efuse::mac_address();
    let identity: &'static DeviceIdentity = IDENTITY.init(DeviceIdentity::from_mac(&mac));
    info!("Battery button {}", identity);

    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize radio"));
    let (controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let [m0, m1, m2, m3, m4, m5] = mac;
    let seed = u64::from_le_bytes([m0, m1, m2, m3, m4, m5, 0, 0]) ^ Instant::now().as_ticks();
    let (stack, mut runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    let mut adc_config = AdcConfig::new();
    let supply_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let supply = AdcSupply::new(Adc::new(peripherals.ADC1, adc_config), supply_pin);

    #[cfg(feature = "update-mode")]
    let (button, server, web) = {
        let endpoint: &'static Endpoint = UPDATE_ENDPOINT.init(UpdateEndpoint::new(
            config.update,
            OtaSink::new(FlashStorage::new(peripherals.FLASH)),
        ));
        let UpdateBuffers { http, mdns } = UPDATE_BUFFERS.init(UpdateBuffers::new());
        let path = config.update.path;
        let web = async move {
            let app = update::router(path);
            serve_updates(stack, &app, endpoint, http).await
        };
        (
            // GPIO0 is a strapping pin: held low through reset it selects download mode
            Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up)),
            UpdateServer::new(stack, endpoint, mdns),
            web,
        )
    };
    #[cfg(feature = "status-led")]
    let setup = UpdateMode::with_led(
        button,
        StatusLed::new(Output::new(
            peripherals.GPIO21,
            Level::High,
            OutputConfig::default(),
        )),
        server,
    );
    #[cfg(all(feature = "update-mode", not(feature = "status-led")))]
    let setup = UpdateMode::without_led(button, server);
    #[cfg(not(feature = "update-mode"))]
    let (setup, web) = (NoSetupMode, core::future::pending::<core::convert::Infallible>());

    let app = async {
        let mut timer = PhaseTimer::new(config.debug, EmbassyClock.now_ms());
        let mut link = EspWifiLink::new(controller, stack);
        let schedule = PollSchedule::new(config.debug);
        if let Err(e) = acquire_network(&mut link, &config.internet, schedule, &mut Delay).await {
            warn!("{}", e);
        }
        timer.lap("WiFi", EmbassyClock.now_ms());

        let transport = EmbassyNetTransport::new(
            stack,
            MQTT_TCP_RX.init([0; MQTT_BUFFER_LEN]),
            MQTT_TCP_TX.init([0; MQTT_BUFFER_LEN]),
            BrokerEndpoint {
                host: config.broker.host,
                port: config.broker.port,
            },
        );
        let session = MqttSession::new(
            transport,
            SessionCredentials::new(identity, &config.broker),
            MQTT_WRITE.init([0; MQTT_BUFFER_LEN]),
            MQTT_READ.init([0; MQTT_BUFFER_LEN]),
        );

        let mut cycle = WakeCycle::new(
            identity,
            MessagingClient::new(session, identity),
            PowerReporter::new(supply),
            setup,
            Delay,
            EmbassyClock,
            timer,
        );
        cycle.run().await
    };

    let request = match select3(runner.run(), app, web).await {
        Either3::First(never) => match never {},
        Either3::Second(request) => request,
        Either3::Third(never) => match never {},
    };

    deep_sleep(&mut rtc, request)
}
