//! # Bluetooth RFCOMM Backend
//!
//! Talks to embossers over Bluetooth Classic Serial Port Profile (SPP) on
//! Linux, using the BlueZ command line tools for adapter control and a raw
//! TTY for data.
//!
//! ## Bluetooth Setup (Linux)
//!
//! Discovery and pairing go through `bluetoothctl`. Connecting binds the
//! device to an RFCOMM TTY, the same as doing it by hand:
//!
//! ```bash
//! $ bluetoothctl --timeout 5 scan on
//! $ bluetoothctl pair 00:11:62:XX:XX:XX
//! $ sudo rfcomm bind 0 00:11:62:XX:XX:XX 1
//! # This creates /dev/rfcomm0
//! ```
//!
//! ## TTY Configuration
//!
//! The RFCOMM device is opened in raw mode so cell bytes and command bytes
//! pass through unmodified:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, ... cleared
//! - **No output processing**: OPOST cleared (no CR/LF translation)
//! - **8-bit characters**: CS8, no parity
//! - **Non-canonical reads**: VMIN 0 / VTIME so status reads time out
//!
//! Writes and reads are blocking file I/O, run on the blocking thread pool.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::backend::{Advertisement, Link, LinkInfo, Radio};
use crate::error::{BraillinkError, Result};
use crate::lock;
use crate::transfer::wire::{self, STATUS_REPLY_LEN};

/// Serial Port Profile service UUID.
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// RFCOMM channel used by SPP devices.
const SPP_CHANNEL: &str = "1";

/// Signal strength reported when the adapter gives none.
pub const APPROXIMATE_RSSI: i16 = -70;

/// Kernel listing of RFCOMM bindings.
const PROC_RFCOMM: &str = "/proc/net/rfcomm";

/// Status read timeout in tenths of a second (termios VTIME).
const READ_TIMEOUT_DECISECONDS: u8 = 10;

/// Settle time after `bluetoothctl connect` and `rfcomm bind`.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// BlueZ-backed radio. Links are bound to `/dev/rfcomm{index}`.
#[derive(Debug, Clone)]
pub struct RfcommRadio {
    rfcomm_index: u8,
}

impl RfcommRadio {
    pub fn new(rfcomm_index: u8) -> Self {
        Self { rfcomm_index }
    }
}

impl Default for RfcommRadio {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl Radio for RfcommRadio {
    async fn check_permissions(&self) -> Result<()> {
        let output = bluetoothctl(&["show"]).await?;
        match parse_adapter_state(&output) {
            AdapterState::Denied => Err(BraillinkError::PermissionDenied(
                "not authorized to use the Bluetooth adapter".to_string(),
            )),
            AdapterState::Missing => Err(BraillinkError::RadioUnavailable(
                "no Bluetooth adapter found".to_string(),
            )),
            AdapterState::PoweredOff => Err(BraillinkError::RadioUnavailable(
                "Bluetooth is powered off".to_string(),
            )),
            AdapterState::Ready => Ok(()),
        }
    }

    async fn is_enabled(&self) -> bool {
        match bluetoothctl(&["show"]).await {
            Ok(output) => parse_adapter_state(&output) == AdapterState::Ready,
            Err(e) => {
                debug!("Adapter query failed: {}", e);
                false
            }
        }
    }

    async fn enable(&self) -> Result<()> {
        let output = bluetoothctl(&["power", "on"]).await?;
        if output.contains("succeeded") {
            info!("Bluetooth powered on");
            return Ok(());
        }
        match parse_adapter_state(&output) {
            AdapterState::Denied => Err(BraillinkError::PermissionDenied(
                "not authorized to power on the Bluetooth adapter".to_string(),
            )),
            AdapterState::Missing => Err(BraillinkError::RadioUnavailable(
                "no Bluetooth adapter found".to_string(),
            )),
            _ => Err(BraillinkError::RadioUnavailable(format!(
                "could not power on Bluetooth: {}",
                last_line(&output)
            ))),
        }
    }

    async fn scan(
        &self,
        timeout: Duration,
        found: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        let paired: HashSet<String> = self
            .bonded_devices()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|adv| adv.id)
            .collect();

        let secs = timeout.as_secs().max(1).to_string();
        let mut child = tokio::process::Command::new("bluetoothctl")
            .args(["--timeout", &secs, "scan", "on"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(tool_error("bluetoothctl"))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BraillinkError::RadioUnavailable("bluetoothctl produced no output".to_string())
        })?;

        let mut seen: HashMap<String, Advertisement> = HashMap::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(update) = parse_scan_line(&line) else {
                continue;
            };
            let id = update.id().to_string();
            let adv = seen.entry(id.clone()).or_insert_with(|| Advertisement {
                paired: paired.contains(&id),
                id,
                name: None,
                rssi: APPROXIMATE_RSSI,
            });
            match update {
                ScanLine::Seen { name, .. } => adv.name = name.or(adv.name.take()),
                ScanLine::Rssi { rssi, .. } => adv.rssi = rssi,
            }
            if found.send(adv.clone()).is_err() {
                break;
            }
        }

        child.wait().await?;
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Advertisement>> {
        let output = bluetoothctl(&["devices", "Paired"]).await?;
        Ok(parse_device_list(&output)
            .into_iter()
            .map(|(id, name)| Advertisement {
                id,
                name,
                rssi: APPROXIMATE_RSSI,
                paired: true,
            })
            .collect())
    }

    async fn is_paired(&self, id: &str) -> Result<bool> {
        let mac = checked_mac(id)?;
        let output = bluetoothctl(&["info", &mac]).await?;
        if output.contains("not available") {
            return Err(BraillinkError::DeviceNotFound(id.to_string()));
        }
        Ok(output.lines().any(|l| l.trim() == "Paired: yes"))
    }

    async fn pair(&self, id: &str) -> Result<()> {
        let mac = checked_mac(id)?;
        info!("Pairing with {}...", mac);
        let output = bluetoothctl(&["pair", &mac]).await?;
        if output.contains("Pairing successful") || output.contains("AlreadyExists") {
            Ok(())
        } else {
            Err(BraillinkError::PairingFailed(last_line(&output)))
        }
    }

    async fn connect(&self, id: &str) -> Result<Box<dyn Link>> {
        let mac = checked_mac(id)?;
        let index = self.rfcomm_index;
        let link = blocking(move || {
            let path = match find_rfcomm_for_mac(&mac)? {
                Some(path) => {
                    debug!("Reusing {} for {}", path, mac);
                    path
                }
                None => setup_rfcomm(&mac, index)?,
            };
            // An existing binding may live on any index
            let index = rfcomm_index_of(&path).ok_or_else(|| {
                BraillinkError::Transfer(format!("{} is not an RFCOMM device", path))
            })?;
            RfcommLink::open(&path, &mac, index)
        })
        .await?;
        Ok(Box::new(link))
    }
}

/// An open RFCOMM TTY.
#[derive(Debug)]
pub struct RfcommLink {
    mac: String,
    path: PathBuf,
    index: u8,
    file: Arc<Mutex<File>>,
    open: AtomicBool,
}

impl RfcommLink {
    /// Open and configure the TTY at `path`.
    ///
    /// ## Errors
    ///
    /// - The device doesn't exist
    /// - Permission denied (may need root or the dialout group)
    /// - TTY configuration fails
    pub fn open<P: AsRef<Path>>(path: P, mac: &str, index: u8) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => BraillinkError::PermissionDenied(format!(
                    "cannot open {}: {}",
                    path.display(),
                    e
                )),
                _ => BraillinkError::Transfer(format!("Failed to open {}: {}", path.display(), e)),
            })?;

        configure_tty_raw(&file)?;
        info!("Opened {} for {}", path.display(), mac);

        Ok(Self {
            mac: mac.to_string(),
            path: path.to_path_buf(),
            index,
            file: Arc::new(Mutex::new(file)),
            open: AtomicBool::new(true),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The N in `/dev/rfcommN`, released on close.
    pub fn index(&self) -> u8 {
        self.index
    }
}

#[async_trait]
impl Link for RfcommLink {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let file = Arc::clone(&self.file);
        let data = data.to_vec();
        blocking(move || {
            let mut file = lock(&file);
            file.write_all(&data)
                .and_then(|_| file.flush())
                .map_err(|e| BraillinkError::Transfer(format!("Write failed: {}", e)))
        })
        .await
    }

    async fn read_status(&self) -> Result<[u8; 3]> {
        let file = Arc::clone(&self.file);
        blocking(move || {
            let mut file = lock(&file);
            file.write_all(&wire::status_request())
                .and_then(|_| file.flush())
                .map_err(|e| BraillinkError::Transfer(format!("Status request failed: {}", e)))?;
            let mut reply = [0u8; STATUS_REPLY_LEN];
            file.read_exact(&mut reply)
                .map_err(|e| BraillinkError::Transfer(format!("Status reply failed: {}", e)))?;
            Ok(reply)
        })
        .await
    }

    async fn info(&self) -> Result<LinkInfo> {
        // SPP embossers expose no firmware query; battery comes from status
        let [battery, _, _] = self.read_status().await?;
        Ok(LinkInfo {
            firmware_version: None,
            battery_level: Some(battery.min(100)),
        })
    }

    /// Channel state from the kernel, then BlueZ. The TTY node outlives the
    /// radio link.
    async fn is_connected(&self) -> bool {
        if !self.open.load(Ordering::SeqCst) || !self.path.exists() {
            return false;
        }
        if let Ok(listing) = tokio::fs::read_to_string(PROC_RFCOMM).await {
            if let Some(connected) = rfcomm_channel_connected(&listing, self.index) {
                return connected;
            }
        }
        match bluetoothctl(&["info", &self.mac]).await {
            Ok(output) => output.lines().any(|l| l.trim() == "Connected: yes"),
            Err(e) => {
                debug!("Link query for {} failed: {}", self.mac, e);
                false
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let index = self.index;
        let mac = self.mac.clone();
        blocking(move || {
            let output = Command::new("rfcomm")
                .args(["release", &index.to_string()])
                .output()
                .map_err(tool_error("rfcomm"))?;
            if !output.status.success() {
                return Err(BraillinkError::Transfer(format!(
                    "rfcomm release failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            info!("Released rfcomm{} ({})", index, mac);
            Ok(())
        })
        .await
    }
}

// ============================================================================
// BLUETOOTHCTL
// ============================================================================

async fn bluetoothctl(args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("bluetoothctl")
        .args(args)
        .output()
        .await
        .map_err(tool_error("bluetoothctl"))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(clean_output(&text))
}

fn tool_error(tool: &'static str) -> impl Fn(io::Error) -> BraillinkError {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => BraillinkError::RadioUnavailable(format!("{} is not installed", tool)),
        io::ErrorKind::PermissionDenied => BraillinkError::PermissionDenied(format!("{}: {}", tool, e)),
        _ => BraillinkError::Io(e),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BraillinkError::Transfer(format!("I/O task failed: {}", e)))?
}

fn checked_mac(id: &str) -> Result<String> {
    if is_valid_mac(id) {
        Ok(id.to_uppercase())
    } else {
        Err(BraillinkError::DeviceNotFound(format!("{} is not a Bluetooth address", id)))
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no response")
        .to_string()
}

/// Drop terminal escape sequences and carriage returns from bluetoothctl
/// output.
fn clean_output(text: &str) -> String {
    strip_ansi_escapes::strip_str(text).replace('\r', "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    Ready,
    PoweredOff,
    Missing,
    Denied,
}

fn parse_adapter_state(show: &str) -> AdapterState {
    let lower = show.to_lowercase();
    if lower.contains("not authorized") || lower.contains("access denied") || lower.contains("permission denied") {
        AdapterState::Denied
    } else if lower.contains("no default controller") {
        AdapterState::Missing
    } else if show.lines().any(|l| l.trim() == "Powered: yes") {
        AdapterState::Ready
    } else {
        AdapterState::PoweredOff
    }
}

/// One useful line of `scan on` output.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanLine {
    Seen { id: String, name: Option<String> },
    Rssi { id: String, rssi: i16 },
}

impl ScanLine {
    fn id(&self) -> &str {
        match self {
            Self::Seen { id, .. } | Self::Rssi { id, .. } => id,
        }
    }
}

/// Parse lines such as:
///
/// ```text
/// [NEW] Device 00:11:22:33:44:55 Braille Embosser
/// [CHG] Device 00:11:22:33:44:55 RSSI: -56
/// [CHG] Device 00:11:22:33:44:55 RSSI: 0xffffffc8 (-56)
/// ```
fn parse_scan_line(line: &str) -> Option<ScanLine> {
    let line = clean_output(line);
    let rest = line.trim().strip_prefix("[NEW] Device ").map(|r| (true, r)).or_else(|| {
        line.trim()
            .strip_prefix("[CHG] Device ")
            .map(|r| (false, r))
    });
    let (is_new, rest) = rest?;
    let (id, detail) = rest.split_once(' ').unwrap_or((rest, ""));
    if !is_valid_mac(id) {
        return None;
    }
    let id = id.to_uppercase();

    if let Some(value) = detail.strip_prefix("RSSI: ") {
        let rssi = match value.rsplit_once('(') {
            Some((_, tail)) => tail.trim_end_matches(')').parse().ok()?,
            None => value.trim().parse().ok()?,
        };
        return Some(ScanLine::Rssi { id, rssi });
    }
    if is_new {
        // unnamed devices repeat their address as the name
        let name = detail.trim();
        let name = (!name.is_empty() && name.replace('-', ":").to_uppercase() != id)
            .then(|| name.to_string());
        return Some(ScanLine::Seen { id, name });
    }
    if let Some(name) = detail.strip_prefix("Name: ") {
        return Some(ScanLine::Seen {
            id,
            name: Some(name.trim().to_string()),
        });
    }
    None
}

/// Parse `devices` output: `Device <MAC> <name>` per line.
fn parse_device_list(output: &str) -> Vec<(String, Option<String>)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ').unwrap_or((rest, ""));
            is_valid_mac(mac).then(|| {
                let name = name.trim();
                (mac.to_uppercase(), (!name.is_empty()).then(|| name.to_string()))
            })
        })
        .collect()
}

// ============================================================================
// TTY
// ============================================================================

/// Configure a file descriptor for raw TTY mode.
///
/// Note: IXON/IXOFF/IXANY disable XON/XOFF software flow control. Cell bytes
/// 0x11 and 0x13 are valid patterns and must not be swallowed.
#[cfg(unix)]
fn configure_tty_raw(file: &File) -> Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let mut termios = MaybeUninit::uninit();
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(io::Error::last_os_error().into());
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

    // Reads return after VTIME with whatever arrived
    termios.c_cc[libc::VMIN] = 0;
    termios.c_cc[libc::VTIME] = READ_TIMEOUT_DECISECONDS;

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_file: &File) -> Result<()> {
    Ok(())
}

// ============================================================================
// RFCOMM SETUP HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Checks `/proc/net/rfcomm` and falls back to `rfcomm -a`.
#[cfg(unix)]
pub fn find_rfcomm_for_mac(mac: &str) -> Result<Option<String>> {
    let mac_upper = mac.to_uppercase();

    if let Ok(contents) = fs::read_to_string(PROC_RFCOMM) {
        if let Some(path) = rfcomm_path_in(&contents, &mac_upper) {
            return Ok(Some(path));
        }
    }

    let output = Command::new("rfcomm")
        .arg("-a")
        .output()
        .map_err(tool_error("rfcomm"))?;
    Ok(rfcomm_path_in(&String::from_utf8_lossy(&output.stdout), &mac_upper))
}

#[cfg(not(unix))]
pub fn find_rfcomm_for_mac(_mac: &str) -> Result<Option<String>> {
    Ok(None)
}

/// Lines look like `rfcomm0: XX:XX:XX:XX:XX:XX channel 1 clean`.
fn rfcomm_path_in(listing: &str, mac_upper: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(mac_upper))
        .filter_map(|line| line.split(':').next())
        .map(|name| format!("/dev/{}", name.trim()))
        .find(|path| Path::new(path).exists())
}

/// `/dev/rfcomm3` → 3
fn rfcomm_index_of(path: &str) -> Option<u8> {
    path.strip_prefix("/dev/rfcomm")?.parse().ok()
}

/// Whether the listing shows `rfcomm{index}` in the `connected` state.
/// None if the index is not listed at all.
fn rfcomm_channel_connected(listing: &str, index: u8) -> Option<bool> {
    let prefix = format!("rfcomm{}:", index);
    listing
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(&prefix))
        .map(|line| line.split_whitespace().any(|word| word == "connected"))
}

/// Bind an RFCOMM TTY for a Bluetooth MAC address.
///
/// Runs:
/// 1. `bluetoothctl connect <MAC>`
/// 2. `rfcomm bind <index> <MAC> 1`
///
/// Returns the device path (e.g. "/dev/rfcomm0"). `rfcomm bind` needs root
/// or CAP_NET_ADMIN.
#[cfg(unix)]
pub fn setup_rfcomm(mac: &str, index: u8) -> Result<String> {
    let mac_upper = mac.to_uppercase();
    let device_path = format!("/dev/rfcomm{}", index);

    info!("Connecting to {}...", mac_upper);
    let output = Command::new("bluetoothctl")
        .args(["connect", &mac_upper])
        .output()
        .map_err(tool_error("bluetoothctl"))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains("Connection successful") || stdout.contains("already connected") {
        debug!("bluetoothctl connected {}", mac_upper);
    } else {
        // rfcomm bind below is the real check
        warn!("bluetoothctl returned: {}", stdout.trim());
    }
    thread::sleep(SETTLE_DELAY);

    info!("Binding rfcomm{}...", index);
    let output = Command::new("rfcomm")
        .args(["bind", &index.to_string(), &mac_upper, SPP_CHANNEL])
        .output()
        .map_err(tool_error("rfcomm"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = format!("rfcomm bind failed: {}", stderr.trim());
        return Err(if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
            BraillinkError::PermissionDenied(message)
        } else {
            BraillinkError::Transfer(message)
        });
    }

    thread::sleep(SETTLE_DELAY);
    if !Path::new(&device_path).exists() {
        return Err(BraillinkError::Transfer(format!(
            "Device {} was not created",
            device_path
        )));
    }

    info!("Created {}", device_path);
    Ok(device_path)
}

#[cfg(not(unix))]
pub fn setup_rfcomm(_mac: &str, _index: u8) -> Result<String> {
    Err(BraillinkError::RadioUnavailable(
        "RFCOMM setup not supported on this platform".to_string(),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
