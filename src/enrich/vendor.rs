//! MAC vendor lookup from the OUI (first three octets)

use eui48::MacAddress;
use log::{debug, warn};
use once_cell::sync::Lazy;
use oui::OuiDatabase;
use pnet::util::MacAddr;
use std::path::Path;
use std::sync::Arc;

/// Returned for prefixes missing from the table
pub const UNKNOWN_VENDOR: &str = "Unknown";

/// Built-in OUI table in Wireshark `manuf` layout: prefix, short name and
/// long name separated by tabs
const BUILTIN_OUI: &str = r#"
00:00:0C	Cisco	Cisco Systems
00:12:17	CiscoLin	Cisco-Linksys
00:14:BF	CiscoLin	Cisco-Linksys
00:1A:70	CiscoLin	Cisco-Linksys
00:18:0A	Cisco	Cisco Meraki
88:15:44	Cisco	Cisco Meraki
00:03:93	Apple	Apple
00:05:02	Apple	Apple
00:0A:95	Apple	Apple
00:0D:93	Apple	Apple
00:17:F2	Apple	Apple
00:1C:B3	Apple	Apple
00:1E:C2	Apple	Apple
00:25:00	Apple	Apple
00:26:BB	Apple	Apple
28:CF:E9	Apple	Apple
3C:07:54	Apple	Apple
A4:5E:60	Apple	Apple
AC:BC:32	Apple	Apple
F0:18:98	Apple	Apple
B8:27:EB	Raspberr	Raspberry Pi Foundation
DC:A6:32	Raspberr	Raspberry Pi Trading
E4:5F:01	Raspberr	Raspberry Pi Trading
00:0C:29	VMware	VMware
00:50:56	VMware	VMware
00:05:69	VMware	VMware
08:00:27	Oracle	Oracle VirtualBox
52:54:00	QEMUKVM	QEMU/KVM
00:1C:42	Parallel	Parallels
00:16:3E	Xensourc	Xensource
00:15:5D	Microsof	Microsoft
00:0D:3A	Microsof	Microsoft
00:22:48	Microsof	Microsoft
00:50:F2	Microsof	Microsoft
7C:1E:52	Microsof	Microsoft
60:45:BD	Microsof	Microsoft
00:1A:11	Google	Google
54:60:09	Google	Google
F4:F5:D8	Google	Google
F4:F5:E8	Google	Google
18:B4:30	Nest	Nest Labs
64:16:66	Nest	Nest Labs
44:65:0D	Amazon	Amazon Technologies
68:37:E9	Amazon	Amazon Technologies
74:C2:46	Amazon	Amazon Technologies
F0:27:2D	Amazon	Amazon Technologies
FC:65:DE	Amazon	Amazon Technologies
00:17:88	Philips	Philips Lighting
EC:B5:FA	Philips	Philips Lighting
D0:73:D5	LIFX	LIFX
00:0E:58	Sonos	Sonos
5C:AA:FD	Sonos	Sonos
78:28:CA	Sonos	Sonos
94:9F:3E	Sonos	Sonos
B8:E9:37	Sonos	Sonos
00:12:FB	Samsung	Samsung Electronics
00:16:32	Samsung	Samsung Electronics
00:1D:25	Samsung	Samsung Electronics
5C:49:7D	Samsung	Samsung Electronics
8C:77:12	Samsung	Samsung Electronics
F8:04:2E	Samsung	Samsung Electronics
00:1E:75	LG	LG Electronics
A8:23:FE	LG	LG Electronics
CC:2D:8C	LG	LG Electronics
00:13:A9	Sony	Sony
00:1D:BA	Sony	Sony
00:24:BE	Sony	Sony
FC:F1:52	Sony	Sony
70:9E:29	Sony	Sony Interactive Entertainment
00:09:BF	Nintendo	Nintendo
00:17:AB	Nintendo	Nintendo
7C:BB:8A	Nintendo	Nintendo
98:B6:E9	Nintendo	Nintendo
00:14:22	Dell	Dell
00:21:9B	Dell	Dell
B8:CA:3A	Dell	Dell
F8:B1:56	Dell	Dell
00:13:E8	Intel	Intel Corporate
00:1B:21	Intel	Intel Corporate
00:1F:3B	Intel	Intel Corporate
3C:A9:F4	Intel	Intel Corporate
00:1B:78	Hewlett	Hewlett Packard
00:21:5A	Hewlett	Hewlett Packard
10:60:4B	Hewlett	Hewlett Packard
3C:D9:2B	Hewlett	Hewlett Packard
00:00:48	Seiko	Seiko Epson
00:26:AB	Seiko	Seiko Epson
64:EB:8C	Seiko	Seiko Epson
00:1B:A9	Brother	Brother Industries
00:80:77	Brother	Brother Industries
30:05:5C	Brother	Brother Industries
00:00:85	Canon	Canon
00:1E:8F	Canon	Canon
00:17:C8	Kyocera	Kyocera
00:11:32	Synology	Synology
00:08:9B	QNAP	QNAP Systems
24:5E:BE	QNAP	QNAP Systems
00:90:A9	Western	Western Digital
00:04:4B	NVIDIA	NVIDIA
48:B0:2D	NVIDIA	NVIDIA
00:1A:92	ASUSTek	ASUSTek Computer
00:1F:C6	ASUSTek	ASUSTek Computer
04:D4:C4	ASUSTek	ASUSTek Computer
38:2C:4A	ASUSTek	ASUSTek Computer
AC:22:0B	ASUSTek	ASUSTek Computer
00:14:6C	Netgear	Netgear
00:1B:2F	Netgear	Netgear
00:24:B2	Netgear	Netgear
20:E5:2A	Netgear	Netgear
A0:40:A0	Netgear	Netgear
00:1B:11	DLink	D-Link
00:24:01	DLink	D-Link
00:26:5A	DLink	D-Link
1C:7E:E5	DLink	D-Link
28:10:7B	DLink	D-Link
1C:3B:F3	TPLink	TP-Link
50:C7:BF	TPLink	TP-Link
98:DA:C4	TPLink	TP-Link
AC:84:C6	TPLink	TP-Link
B0:4E:26	TPLink	TP-Link
B0:BE:76	TPLink	TP-Link
C0:25:E9	TPLink	TP-Link
EC:08:6B	TPLink	TP-Link
F4:F2:6D	TPLink	TP-Link
00:27:22	Ubiquiti	Ubiquiti Networks
04:18:D6	Ubiquiti	Ubiquiti Networks
24:A4:3C	Ubiquiti	Ubiquiti Networks
78:8A:20	Ubiquiti	Ubiquiti Networks
F0:9F:C2	Ubiquiti	Ubiquiti Networks
FC:EC:DA	Ubiquiti	Ubiquiti Networks
00:0C:42	MikroTik	MikroTik
4C:5E:0C	MikroTik	MikroTik
6C:3B:6B	MikroTik	MikroTik
D4:CA:6D	MikroTik	MikroTik
00:1D:CE	Arris	Arris
00:1D:D5	Arris	Arris
00:E0:FC	Huawei	Huawei Technologies
00:18:82	Huawei	Huawei Technologies
28:6E:D4	Huawei	Huawei Technologies
48:46:FB	Huawei	Huawei Technologies
00:9E:C8	Xiaomi	Xiaomi
28:6C:07	Xiaomi	Xiaomi
34:CE:00	Xiaomi	Xiaomi
64:09:80	Xiaomi	Xiaomi
78:11:DC	Xiaomi	Xiaomi
18:FE:34	Espressi	Espressif
24:0A:C4	Espressi	Espressif
24:6F:28	Espressi	Espressif
30:AE:A4	Espressi	Espressif
3C:71:BF	Espressi	Espressif
5C:CF:7F	Espressi	Espressif
84:F3:EB	Espressi	Espressif
A4:CF:12	Espressi	Espressif
EC:FA:BC	Espressi	Espressif
00:40:8C	Axis	Axis Communications
AC:CC:8E	Axis	Axis Communications
B8:A4:4F	Axis	Axis Communications
28:57:BE	Hangzhou	Hangzhou Hikvision
44:19:B6	Hangzhou	Hangzhou Hikvision
BC:AD:28	Hangzhou	Hangzhou Hikvision
3C:EF:8C	Zhejiang	Zhejiang Dahua
4C:11:BF	Zhejiang	Zhejiang Dahua
C0:56:27	Belkin	Belkin International
94:10:3E	Belkin	Belkin International
EC:1A:59	Belkin	Belkin International
00:10:18	Broadcom	Broadcom
00:E0:4C	Realtek	Realtek Semiconductor
00:09:0F	Fortinet	Fortinet
00:1B:17	Palo	Palo Alto Networks
00:0D:B9	PC	PC Engines
00:00:5E	IANA	IANA
"#;

static BUILTIN: Lazy<Option<Arc<OuiDatabase>>> =
    Lazy::new(|| match OuiDatabase::new_from_str(BUILTIN_OUI) {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            warn!("Builtin OUI table rejected: {:?}", e);
            None
        }
    });

/// Parse a MAC address in `aa:bb:cc:dd:ee:ff` or `aa-bb-..` form.
/// Single-digit octets (as BSD `arp` prints them) are accepted.
pub fn parse_mac(text: &str) -> Option<MacAddr> {
    let parts: Vec<&str> = text.trim().split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }

    let mut octets = [0u8; 6];
    for (octet, part) in octets.iter_mut().zip(parts) {
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *octet = u8::from_str_radix(part, 16).ok()?;
    }

    Some(MacAddr::new(
        octets[0], octets[1], octets[2], octets[3], octets[4], octets[5],
    ))
}

/// OUI to manufacturer lookup. Layers are queried in order, so entries from
/// a `manuf` file shadow the builtin table.
#[derive(Clone, Default)]
pub struct VendorDatabase {
    layers: Vec<Arc<OuiDatabase>>,
}

impl VendorDatabase {
    /// The builtin table alone
    pub fn builtin() -> Self {
        Self {
            layers: BUILTIN.iter().cloned().collect(),
        }
    }

    /// Builtin table with a `manuf` file layered on top
    pub fn with_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = OuiDatabase::new_from_file(&*path.to_string_lossy()).map_err(|e| {
            crate::ScanError::ParseError(format!("OUI file {}: {:?}", path.display(), e))
        })?;
        debug!("Loaded OUI database from {}", path.display());

        let mut db = Self::builtin();
        db.layers.insert(0, Arc::new(file));
        Ok(db)
    }

    /// Builtin table, extended from `path` when given and readable
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::with_file(path).unwrap_or_else(|e| {
                warn!("Cannot read OUI file {}: {}", path.display(), e);
                Self::builtin()
            }),
            None => Self::builtin(),
        }
    }

    /// Manufacturer for a MAC address; never fails
    pub fn lookup(&self, mac: &MacAddr) -> String {
        let mac = MacAddress::new([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
        self.layers
            .iter()
            .find_map(|db| db.query_by_mac(&mac).ok().flatten())
            .map(|entry| entry.name_long.unwrap_or(entry.name_short))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_VENDOR.to_string())
    }
}
