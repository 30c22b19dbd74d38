//! BLE GATT adapter.
//!
//! Implements [`BleTransport`] — the hexagonal boundary to the radio.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//!   Stack callbacks queue [`TransportEvent`]s in a static; the owner drains
//!   them with [`BleTransport::poll_event`].
//! - **all other targets**: an in-memory radio for host-side tests, driven
//!   through the `sim_*` methods.
//!
//! ## Advertising PDUs
//!
//! ```text
//! ADV_IND:  02 01 06 | 03 03 81 FD | len FF <manufacturer data>
//! SCAN_RSP: len 09 <device name>
//! ```

use core::fmt;
use log::{debug, info, warn};

use crate::app::ports::{
    ADV_DATA_CAPACITY, AdvertisementPayload, AdvertisingParams, BleTransport, ServiceLayout,
    TransportError, TransportEvent,
};
use crate::identity::address::BleAddress;
use crate::protocol::ConnHandle;

#[cfg(not(target_os = "espidf"))]
use crate::app::ports::{Characteristic, MAX_ATTR_LEN};
#[cfg(not(target_os = "espidf"))]
use std::collections::{HashMap, VecDeque};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;
const AD_TYPE_MANUFACTURER: u8 = 0xFF;
/// LE General Discoverable, BR/EDR not supported.
const ADV_FLAGS: u8 = 0x06;

/// HCI reason "remote user terminated connection".
pub const REASON_REMOTE_TERMINATED: i32 = 0x13;
/// HCI reason "connection terminated by local host".
pub const REASON_LOCAL_TERMINATED: i32 = 0x16;

pub type AdvData = heapless::Vec<u8, ADV_DATA_CAPACITY>;

// ───────────────────────────────────────────────────────────────
// PDU encoding (shared by both backends)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvOverflow;

impl fmt::Display for AdvOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "advertising data exceeds {} bytes", ADV_DATA_CAPACITY)
    }
}

fn push_field(out: &mut AdvData, ad_type: u8, body: &[u8]) -> Result<(), AdvOverflow> {
    let len = u8::try_from(body.len() + 1).map_err(|_| AdvOverflow)?;
    out.push(len).map_err(|_| AdvOverflow)?;
    out.push(ad_type).map_err(|_| AdvOverflow)?;
    out.extend_from_slice(body).map_err(|_| AdvOverflow)
}

/// Build the ADV_IND payload: flags, the service UUID and the
/// manufacturer data.
pub fn encode_adv_data(
    params: &AdvertisingParams,
    payload: &AdvertisementPayload,
) -> Result<AdvData, AdvOverflow> {
    let mut out = AdvData::new();
    push_field(&mut out, AD_TYPE_FLAGS, &[ADV_FLAGS])?;
    push_field(&mut out, AD_TYPE_UUID16_COMPLETE, &params.service_uuid16.to_le_bytes())?;
    if !payload.manufacturer_data.is_empty() {
        push_field(&mut out, AD_TYPE_MANUFACTURER, &payload.manufacturer_data)?;
    }
    Ok(out)
}

/// Build the scan response carrying the complete device name.
pub fn encode_scan_response(payload: &AdvertisementPayload) -> Result<AdvData, AdvOverflow> {
    let mut out = AdvData::new();
    if !payload.device_name.is_empty() {
        push_field(&mut out, AD_TYPE_NAME_COMPLETE, payload.device_name.as_bytes())?;
    }
    Ok(out)
}

/// Whether losing `event` would leave the session table out of step with
/// the controller.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn is_lifecycle(event: &TransportEvent) -> bool {
    matches!(
        event,
        TransportEvent::Connected { .. }
            | TransportEvent::Disconnected { .. }
            | TransportEvent::Subscribed { .. }
    )
}

/// Queue `event`.  On a full queue a lifecycle event takes the place of the
/// oldest pending read or write; anything else is refused.  Returns the
/// event that was lost, if any.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn enqueue_event<const N: usize>(
    queue: &mut heapless::Deque<TransportEvent, N>,
    event: TransportEvent,
) -> Option<TransportEvent> {
    let event = match queue.push_back(event) {
        Ok(()) => return None,
        Err(event) => event,
    };
    if !is_lifecycle(&event) {
        return Some(event);
    }

    let mut evicted = None;
    let mut kept = heapless::Deque::<TransportEvent, N>::new();
    while let Some(pending) = queue.pop_front() {
        if evicted.is_none() && !is_lifecycle(&pending) {
            evicted = Some(pending);
        } else if let Err(pending) = kept.push_back(pending) {
            evicted = Some(pending);
        }
    }
    *queue = kept;

    match evicted {
        Some(lost) => match queue.push_back(event) {
            Ok(()) => Some(lost),
            Err(event) => Some(event),
        },
        None => Some(event),
    }
}

// ── ESP-IDF BLE static state ──────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
mod esp {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use esp_idf_svc::sys::*;

    use crate::app::ports::{Characteristic, MAX_ATTR_LEN, ServiceLayout, TransportEvent};
    use crate::config::MAX_SESSIONS_LIMIT;
    use crate::identity::address::BleAddress;

    const EVENT_QUEUE_DEPTH: usize = 16;

    pub static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    pub static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static WRITE_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static NOTIFY_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static NOTIFY_CCCD_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static CHAR_STEP: AtomicU32 = AtomicU32::new(0);
    pub static ADVERTISING: AtomicBool = AtomicBool::new(false);

    pub static LAYOUT: Mutex<Option<ServiceLayout>> = Mutex::new(None);
    pub static EVENTS: Mutex<heapless::Deque<TransportEvent, EVENT_QUEUE_DEPTH>> =
        Mutex::new(heapless::Deque::new());
    pub static PEERS: Mutex<heapless::Vec<(u16, BleAddress), MAX_SESSIONS_LIMIT>> =
        Mutex::new(heapless::Vec::new());

    pub fn push_event(event: TransportEvent) {
        if let Ok(mut queue) = EVENTS.lock() {
            if let Some(lost) = super::enqueue_event(&mut queue, event) {
                if super::is_lifecycle(&lost) {
                    log::error!("BLE GATTS: event queue full of lifecycle events, lost {lost:?}");
                } else {
                    log::warn!("BLE GATTS: event queue full, dropped {lost:?}");
                }
            }
        }
    }

    /// Answer a Write Request; Write Commands carry no response.
    fn respond_to_write(
        gatts_if: esp_gatt_if_t,
        p: &esp_ble_gatts_cb_param_t_gatts_write_evt_param,
        status: esp_gatt_status_t,
    ) {
        if !p.need_rsp {
            return;
        }
        let ret = unsafe {
            esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, core::ptr::null_mut())
        };
        if ret != ESP_OK as i32 {
            log::warn!("BLE GATTS: write response failed ({ret})");
        }
    }

    /// Bluedroid addresses are most significant byte first.
    pub fn from_bd_addr(bda: &esp_bd_addr_t) -> BleAddress {
        let mut le = *bda;
        le.reverse();
        BleAddress::from_le_bytes(le)
    }

    pub fn to_bd_addr(address: BleAddress) -> esp_bd_addr_t {
        let mut be = address.to_le_bytes();
        be.reverse();
        be
    }

    fn uuid16(uuid: u16) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 2;
        t.uuid.uuid16 = uuid;
        t
    }

    fn uuid32(uuid: u32) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 4;
        t.uuid.uuid32 = uuid;
        t
    }

    fn uuid128(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    unsafe fn create_service(gatts_if: esp_gatt_if_t, uuid: esp_bt_uuid_t, handles: u16) {
        let mut svc_id = esp_gatt_srvc_id_t {
            id: esp_gatt_id_t { uuid, inst_id: 0 },
            is_primary: true,
        };
        unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, handles) };
    }

    unsafe fn add_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
        let mut char_uuid = uuid128(uuid);
        unsafe {
            esp_ble_gatts_add_char(
                svc_handle,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    fn characteristic_of(handle: u16) -> Characteristic {
        let handle = handle as u32;
        if handle == WRITE_CHAR_HANDLE.load(Ordering::Relaxed) {
            Characteristic::Write
        } else if handle == NOTIFY_CHAR_HANDLE.load(Ordering::Relaxed)
            || handle == NOTIFY_CCCD_HANDLE.load(Ordering::Relaxed)
        {
            Characteristic::Notify
        } else {
            Characteristic::Other
        }
    }

    pub unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        _param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                ADVERTISING.store(true, Ordering::Relaxed);
                log::debug!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                ADVERTISING.store(false, Ordering::Relaxed);
                log::debug!("BLE GAP: advertising stopped");
            }
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);
        let layout = LAYOUT.lock().ok().and_then(|l| *l).unwrap_or(ServiceLayout::SESAME);

        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                log::info!("BLE GATTS: app registered (if={})", gatts_if);
                unsafe { create_service(gatts_if, uuid16(layout.service_uuid16), 8) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let p = unsafe { &(*param).create };
                if SVC_HANDLE.load(Ordering::Relaxed) != 0 {
                    // Handle limiter service; nothing to add.
                    unsafe { esp_ble_gatts_start_service(p.service_handle) };
                    log::info!("BLE GATTS: service table complete");
                    return;
                }
                SVC_HANDLE.store(p.service_handle as u32, Ordering::Relaxed);
                unsafe { esp_ble_gatts_start_service(p.service_handle) };
                CHAR_STEP.store(1, Ordering::Relaxed);
                unsafe {
                    add_char(
                        p.service_handle,
                        layout.write_char_uuid,
                        ESP_GATT_PERM_WRITE,
                        ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_WRITE_NR,
                    );
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let p = unsafe { &(*param).add_char };
                let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                match CHAR_STEP.load(Ordering::Relaxed) {
                    1 => {
                        WRITE_CHAR_HANDLE.store(p.attr_handle as u32, Ordering::Relaxed);
                        CHAR_STEP.store(2, Ordering::Relaxed);
                        unsafe {
                            add_char(
                                svc_handle,
                                layout.notify_char_uuid,
                                ESP_GATT_PERM_READ,
                                ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            );
                        }
                    }
                    2 => {
                        NOTIFY_CHAR_HANDLE.store(p.attr_handle as u32, Ordering::Relaxed);
                        CHAR_STEP.store(3, Ordering::Relaxed);
                        let mut cccd = uuid16(ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16);
                        unsafe {
                            esp_ble_gatts_add_char_descr(
                                svc_handle,
                                &mut cccd,
                                (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                                core::ptr::null_mut(),
                                core::ptr::null_mut(),
                            );
                        }
                    }
                    _ => {}
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                let p = unsafe { &(*param).add_char_descr };
                NOTIFY_CCCD_HANDLE.store(p.attr_handle as u32, Ordering::Relaxed);
                unsafe { create_service(gatts_if, uuid32(layout.handle_limit_uuid32), 1) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let p = unsafe { &(*param).connect };
                let address = from_bd_addr(&p.remote_bda);
                if let Ok(mut peers) = PEERS.lock() {
                    let _ = peers.push((p.conn_id, address));
                }
                // Bluedroid stops advertising once a central connects.
                ADVERTISING.store(false, Ordering::Relaxed);
                push_event(TransportEvent::Connected { handle: p.conn_id });
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                let p = unsafe { &(*param).disconnect };
                push_event(TransportEvent::Disconnected {
                    handle: p.conn_id,
                    reason: p.reason as i32,
                });
            }
            esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
                let p = unsafe { &(*param).read };
                push_event(TransportEvent::Read {
                    handle: p.conn_id,
                    characteristic: characteristic_of(p.handle),
                });
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = unsafe { &(*param).write };
                let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
                if p.handle as u32 == NOTIFY_CCCD_HANDLE.load(Ordering::Relaxed) {
                    respond_to_write(gatts_if, p, esp_gatt_status_t_ESP_GATT_OK);
                    let sub_value = data
                        .get(..2)
                        .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]));
                    push_event(TransportEvent::Subscribed {
                        handle: p.conn_id,
                        characteristic: Characteristic::Notify,
                        sub_value,
                    });
                    return;
                }
                let mut buf = heapless::Vec::<u8, MAX_ATTR_LEN>::new();
                if buf.extend_from_slice(data).is_err() {
                    log::warn!("BLE GATTS: oversize write ({} bytes) dropped", data.len());
                    respond_to_write(gatts_if, p, esp_gatt_status_t_ESP_GATT_INVALID_ATTR_LEN);
                    return;
                }
                respond_to_write(gatts_if, p, esp_gatt_status_t_ESP_GATT_OK);
                push_event(TransportEvent::Written {
                    handle: p.conn_id,
                    characteristic: characteristic_of(p.handle),
                    data: buf,
                });
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation radio (host only)
// ───────────────────────────────────────────────────────────────

/// In-memory stand-in for the controller, recording everything the server
/// asks of it.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimRadio {
    advertising: bool,
    fail_init: bool,
    next_handle: ConnHandle,
    peers: HashMap<ConnHandle, BleAddress>,
    events: VecDeque<TransportEvent>,
    notifications: Vec<(ConnHandle, Vec<u8>)>,
    disconnect_requests: Vec<ConnHandle>,
    advertisement_updates: usize,
}

pub struct BleAdapter {
    initialized: bool,
    address: Option<BleAddress>,
    services: Option<ServiceLayout>,
    params: Option<AdvertisingParams>,
    adv_data: AdvData,
    scan_response: AdvData,
    /// GATT table is frozen once advertising has started.
    services_locked: bool,
    #[cfg(not(target_os = "espidf"))]
    sim: SimRadio,
}

impl Default for BleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter {
    pub fn new() -> Self {
        Self {
            initialized: false,
            address: None,
            services: None,
            params: None,
            adv_data: AdvData::new(),
            scan_response: AdvData::new(),
            services_locked: false,
            #[cfg(not(target_os = "espidf"))]
            sim: SimRadio {
                next_handle: 1,
                ..SimRadio::default()
            },
        }
    }

    /// Own address configured by `init`.
    pub fn address(&self) -> Option<BleAddress> {
        self.address
    }

    pub fn services(&self) -> Option<&ServiceLayout> {
        self.services.as_ref()
    }

    pub fn advertising_params(&self) -> Option<&AdvertisingParams> {
        self.params.as_ref()
    }

    /// Encoded ADV_IND payload last applied.
    pub fn adv_data(&self) -> &[u8] {
        &self.adv_data
    }

    pub fn scan_response(&self) -> &[u8] {
        &self.scan_response
    }

    fn ensure_initialized(&self) -> Result<(), TransportError> {
        if self.initialized {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_init(&mut self, address: BleAddress) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            if esp_bt_controller_init(&mut bt_cfg) != ESP_OK {
                log::error!("BLE: bt_controller_init failed");
                return Err(TransportError::InitFailed);
            }
            if esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE) != ESP_OK {
                log::error!("BLE: bt_controller_enable failed");
                return Err(TransportError::InitFailed);
            }
            if esp_bluedroid_init() != ESP_OK || esp_bluedroid_enable() != ESP_OK {
                log::error!("BLE: bluedroid bring-up failed");
                return Err(TransportError::InitFailed);
            }

            esp_ble_gap_register_callback(Some(esp::gap_event_handler));
            esp_ble_gatts_register_callback(Some(esp::gatts_event_handler));

            let mut bda = esp::to_bd_addr(address);
            if esp_ble_gap_set_rand_addr(bda.as_mut_ptr()) != ESP_OK {
                log::error!("BLE: own address {} rejected", address);
                return Err(TransportError::InitFailed);
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_init(&mut self, address: BleAddress) -> Result<(), TransportError> {
        if self.sim.fail_init {
            return Err(TransportError::InitFailed);
        }
        info!("BLE(sim): controller up as {}", address);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_register_services(&mut self, layout: &ServiceLayout) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        if let Ok(mut slot) = esp::LAYOUT.lock() {
            *slot = Some(*layout);
        }
        // Service and characteristic creation continues in the GATTS
        // callback chain (REG → CREATE → ADD_CHAR → ADD_CHAR_DESCR).
        if unsafe { esp_ble_gatts_app_register(0) } != ESP_OK {
            return Err(TransportError::InitFailed);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_register_services(&mut self, layout: &ServiceLayout) -> Result<(), TransportError> {
        debug!(
            "BLE(sim): service {:04x} (write {:032x}, notify {:032x}) + limiter {:08x}",
            layout.service_uuid16,
            layout.write_char_uuid,
            layout.notify_char_uuid,
            layout.handle_limit_uuid32
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_apply_advertisement(&mut self) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        let ok = unsafe {
            esp_ble_gap_config_adv_data_raw(
                self.adv_data.as_ptr() as *mut u8,
                self.adv_data.len() as u32,
            ) == ESP_OK
                && esp_ble_gap_config_scan_rsp_data_raw(
                    self.scan_response.as_ptr() as *mut u8,
                    self.scan_response.len() as u32,
                ) == ESP_OK
        };
        if ok {
            Ok(())
        } else {
            Err(TransportError::AdvertisingFailed)
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_apply_advertisement(&mut self) -> Result<(), TransportError> {
        self.sim.advertisement_updates += 1;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_advertising(&mut self) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        let params = self.params.ok_or(TransportError::NotInitialized)?;
        let mut adv_params = esp_ble_adv_params_t {
            adv_int_min: params.min_interval,
            adv_int_max: params.max_interval,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_RANDOM,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        };
        if unsafe { esp_ble_gap_start_advertising(&mut adv_params) } != ESP_OK {
            return Err(TransportError::AdvertisingFailed);
        }
        esp::ADVERTISING.store(true, core::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_advertising(&mut self) -> Result<(), TransportError> {
        self.sim.advertising = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop_advertising(&mut self) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        if unsafe { esp_ble_gap_stop_advertising() } != ESP_OK {
            return Err(TransportError::AdvertisingFailed);
        }
        esp::ADVERTISING.store(false, core::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop_advertising(&mut self) -> Result<(), TransportError> {
        self.sim.advertising = false;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// BleTransport implementation
// ───────────────────────────────────────────────────────────────

impl BleTransport for BleAdapter {
    fn init(&mut self, address: BleAddress) -> Result<(), TransportError> {
        if !address.is_static_random() {
            warn!("BLE: {} is not a static random address", address);
            return Err(TransportError::InitFailed);
        }
        self.platform_init(address)?;
        self.address = Some(address);
        self.initialized = true;
        info!("BLE: initialised, own address {}", address);
        Ok(())
    }

    fn register_services(&mut self, layout: &ServiceLayout) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        if self.services_locked {
            return Err(TransportError::ServicesLocked);
        }
        self.platform_register_services(layout)?;
        self.services = Some(*layout);
        Ok(())
    }

    fn configure_advertising(&mut self, params: &AdvertisingParams) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        self.params = Some(*params);
        Ok(())
    }

    fn set_advertisement(&mut self, payload: &AdvertisementPayload) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        let params = self.params.ok_or(TransportError::NotInitialized)?;
        let adv_data = encode_adv_data(&params, payload).map_err(|e| {
            warn!("BLE: {}", e);
            TransportError::AdvertisingFailed
        })?;
        let scan_response = encode_scan_response(payload).map_err(|e| {
            warn!("BLE: scan response {}", e);
            TransportError::AdvertisingFailed
        })?;
        self.adv_data = adv_data;
        self.scan_response = scan_response;
        self.platform_apply_advertisement()
    }

    fn start_advertising(&mut self) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        if self.is_advertising() {
            return Ok(());
        }
        self.platform_start_advertising()?;
        self.services_locked = true;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        if !self.is_advertising() {
            return Ok(());
        }
        self.platform_stop_advertising()
    }

    #[cfg(target_os = "espidf")]
    fn is_advertising(&self) -> bool {
        esp::ADVERTISING.load(core::sync::atomic::Ordering::Relaxed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn is_advertising(&self) -> bool {
        self.sim.advertising
    }

    #[cfg(target_os = "espidf")]
    fn notify(&mut self, handle: ConnHandle, data: &[u8]) -> Result<(), TransportError> {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;
        let attr = esp::NOTIFY_CHAR_HANDLE.load(Ordering::Relaxed) as u16;
        if attr == 0 {
            return Err(TransportError::NotInitialized);
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                esp::GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                handle,
                attr,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                false,
            )
        };
        if ret != ESP_OK {
            return Err(TransportError::NotifyFailed);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn notify(&mut self, handle: ConnHandle, data: &[u8]) -> Result<(), TransportError> {
        if !self.sim.peers.contains_key(&handle) {
            return Err(TransportError::UnknownConnection);
        }
        self.sim.notifications.push((handle, data.to_vec()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn disconnect(&mut self, handle: ConnHandle) {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;
        let ret = unsafe {
            esp_ble_gatts_close(esp::GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t, handle)
        };
        if ret != ESP_OK {
            debug!("BLE: disconnect of {} failed ({})", handle, ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn disconnect(&mut self, handle: ConnHandle) {
        self.sim.disconnect_requests.push(handle);
        if self.sim.peers.remove(&handle).is_some() {
            self.sim.events.push_back(TransportEvent::Disconnected {
                handle,
                reason: REASON_LOCAL_TERMINATED,
            });
        } else {
            debug!("BLE(sim): disconnect of unknown handle {}", handle);
        }
    }

    #[cfg(target_os = "espidf")]
    fn peer_address(&self, handle: ConnHandle) -> Option<BleAddress> {
        esp::PEERS
            .lock()
            .ok()
            .and_then(|peers| peers.iter().find(|(h, _)| *h == handle).map(|(_, a)| *a))
    }

    #[cfg(not(target_os = "espidf"))]
    fn peer_address(&self, handle: ConnHandle) -> Option<BleAddress> {
        self.sim.peers.get(&handle).copied()
    }

    #[cfg(target_os = "espidf")]
    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = esp::EVENTS.lock().ok()?.pop_front()?;
        if let TransportEvent::Disconnected { handle, .. } = &event {
            if let Ok(mut peers) = esp::PEERS.lock() {
                peers.retain(|(h, _)| h != handle);
            }
        }
        Some(event)
    }

    #[cfg(not(target_os = "espidf"))]
    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.sim.events.pop_front()
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation controls (host only)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BleAdapter {
    /// Make the next `init` fail.
    pub fn sim_fail_init(&mut self, fail: bool) {
        self.sim.fail_init = fail;
    }

    /// A central at `address` connects.  Advertising stops, as it does on
    /// the real controller.  Returns the new connection handle.
    pub fn sim_connect(&mut self, address: BleAddress) -> ConnHandle {
        let handle = self.sim.next_handle;
        self.sim.next_handle = self.sim.next_handle.wrapping_add(1);
        self.sim.peers.insert(handle, address);
        self.sim.advertising = false;
        self.sim.events.push_back(TransportEvent::Connected { handle });
        handle
    }

    /// The central on `handle` drops the link.
    pub fn sim_disconnect(&mut self, handle: ConnHandle, reason: i32) {
        if self.sim.peers.remove(&handle).is_some() {
            self.sim
                .events
                .push_back(TransportEvent::Disconnected { handle, reason });
        }
    }

    /// The central on `handle` writes the CCCD of `characteristic`.
    pub fn sim_subscribe(&mut self, handle: ConnHandle, characteristic: Characteristic, sub_value: u16) {
        self.sim.events.push_back(TransportEvent::Subscribed {
            handle,
            characteristic,
            sub_value,
        });
    }

    pub fn sim_read(&mut self, handle: ConnHandle, characteristic: Characteristic) {
        self.sim.events.push_back(TransportEvent::Read {
            handle,
            characteristic,
        });
    }

    /// The central on `handle` writes `data`.  Values over the ATT limit
    /// are dropped, as the stack would.
    pub fn sim_write(&mut self, handle: ConnHandle, characteristic: Characteristic, data: &[u8]) {
        let mut buf = heapless::Vec::<u8, MAX_ATTR_LEN>::new();
        if buf.extend_from_slice(data).is_err() {
            warn!("BLE(sim): oversize write ({} bytes) dropped", data.len());
            return;
        }
        self.sim.events.push_back(TransportEvent::Written {
            handle,
            characteristic,
            data: buf,
        });
    }

    pub fn sim_is_connected(&self, handle: ConnHandle) -> bool {
        self.sim.peers.contains_key(&handle)
    }

    pub fn sim_pending_events(&self) -> usize {
        self.sim.events.len()
    }

    pub fn sim_notifications(&self) -> &[(ConnHandle, Vec<u8>)] {
        &self.sim.notifications
    }

    pub fn sim_take_notifications(&mut self) -> Vec<(ConnHandle, Vec<u8>)> {
        core::mem::take(&mut self.sim.notifications)
    }

    pub fn sim_disconnect_requests(&self) -> &[ConnHandle] {
        &self.sim.disconnect_requests
    }

    /// Number of times advertising data was pushed to the controller.
    pub fn sim_advertisement_updates(&self) -> usize {
        self.sim.advertisement_updates
    }
}
