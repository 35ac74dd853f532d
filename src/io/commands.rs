//! Device command table
//!
//! Bill acceptor (9600 8E1):
//! - Frames start with 0x02, second byte is the frame length, last byte is a checksum
//!
//! Coin changer (115200 8N1):
//! - Frames start with 0x02 0x00 and end with the 0x10 0x03 trailer
//!
//! Byte sequences are sent verbatim, checksums included.

use crate::domain::types::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    // Bill acceptor
    BillEnables,
    Status,
    AcceptBill,
    RejectBill,
    InhibitBills,
    DesinhibitBilletero,
    BilleteroEnEspera,
    Enable10,
    Enable10To20,
    Enable10To50,
    Enable10To100,
    Enable10To200,
    EnableAll,
    // Coin changer
    EnableMonedero,
    InhibitMonedero,
    TubeStatus,
    PullMonedero,
    Cambio10Ctvs,
    Cambio20Ctvs,
    Cambio50Ctvs,
    Cambio1Bs,
    Cambio1_50Bs,
    Cambio2Bs,
    Cambio2_50Bs,
    Cambio3Bs,
}

const BILL_ENABLES: &[u8] = &[0x02, 0x06, 0x41, 0xFF, 0xFF, 0xB9];
const STATUS: &[u8] = &[0x02, 0x04, 0xCC, 0x2E];
const ACCEPT_BILL: &[u8] = &[0x02, 0x04, 0x80, 0x7A];
const REJECT_BILL: &[u8] = &[0x02, 0x04, 0x81, 0x79];
const INHIBIT_BILLS: &[u8] = &[0x02, 0x04, 0xF0, 0x0A];
const DESINHIBIT_BILLETERO: &[u8] = &[0x02, 0x04, 0xF1, 0x09];
const BILLETERO_EN_ESPERA: &[u8] = &[0x02, 0x05, 0x40, 0x00, 0xB6];
const ENABLE_10: &[u8] = &[0x02, 0x06, 0x41, 0x01, 0x01, 0xB5];
const ENABLE_10_20: &[u8] = &[0x02, 0x08, 0x41, 0x01, 0x01, 0x02, 0x02, 0xA9];
// Length byte says 0x08 on the wire; the acceptor firmware expects it as-is.
const ENABLE_10_20_50: &[u8] = &[0x02, 0x08, 0x41, 0x01, 0x01, 0x02, 0x02, 0x03, 0x03, 0x59];
const ENABLE_10_20_50_100: &[u8] =
    &[0x02, 0x0A, 0x41, 0x01, 0x01, 0x02, 0x02, 0x03, 0x03, 0x04, 0x04, 0x9F];
const ENABLE_10_20_50_100_200: &[u8] =
    &[0x02, 0x0C, 0x41, 0x01, 0x01, 0x02, 0x02, 0x03, 0x03, 0x04, 0x04, 0x05, 0x05, 0x93];

const ENABLE_MONEDERO: &[u8] = &[0x02, 0x00, 0x0C, 0x00, 0x3F, 0x00, 0x3F, 0x10, 0x03];
const INHIBIT_MONEDERO: &[u8] = &[0x02, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x00, 0x10, 0x03];
const TUBE_STATUS: &[u8] = &[0x02, 0x00, 0x0A, 0x10, 0x03];
const PULL_MONEDERO: &[u8] = &[0x02, 0x00, 0x0B, 0x10, 0x03];
const CAMBIO_10_CTVS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x01, 0x10, 0x03];
const CAMBIO_20_CTVS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x02, 0x10, 0x03];
const CAMBIO_50_CTVS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x05, 0x10, 0x03];
const CAMBIO_1_BS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x0A, 0x10, 0x03];
const CAMBIO_1_50_BS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x0F, 0x10, 0x03];
const CAMBIO_2_BS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x14, 0x10, 0x03];
const CAMBIO_2_50_BS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x19, 0x10, 0x03];
const CAMBIO_3_BS: &[u8] = &[0x02, 0x00, 0x0F, 0x02, 0x1E, 0x10, 0x03];

impl DeviceCommand {
    /// Exact bytes written to the serial line
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            DeviceCommand::BillEnables => BILL_ENABLES,
            DeviceCommand::Status => STATUS,
            DeviceCommand::AcceptBill => ACCEPT_BILL,
            DeviceCommand::RejectBill => REJECT_BILL,
            DeviceCommand::InhibitBills => INHIBIT_BILLS,
            DeviceCommand::DesinhibitBilletero => DESINHIBIT_BILLETERO,
            DeviceCommand::BilleteroEnEspera => BILLETERO_EN_ESPERA,
            DeviceCommand::Enable10 => ENABLE_10,
            DeviceCommand::Enable10To20 => ENABLE_10_20,
            DeviceCommand::Enable10To50 => ENABLE_10_20_50,
            DeviceCommand::Enable10To100 => ENABLE_10_20_50_100,
            DeviceCommand::Enable10To200 | DeviceCommand::EnableAll => ENABLE_10_20_50_100_200,
            DeviceCommand::EnableMonedero => ENABLE_MONEDERO,
            DeviceCommand::InhibitMonedero => INHIBIT_MONEDERO,
            DeviceCommand::TubeStatus => TUBE_STATUS,
            DeviceCommand::PullMonedero => PULL_MONEDERO,
            DeviceCommand::Cambio10Ctvs => CAMBIO_10_CTVS,
            DeviceCommand::Cambio20Ctvs => CAMBIO_20_CTVS,
            DeviceCommand::Cambio50Ctvs => CAMBIO_50_CTVS,
            DeviceCommand::Cambio1Bs => CAMBIO_1_BS,
            DeviceCommand::Cambio1_50Bs => CAMBIO_1_50_BS,
            DeviceCommand::Cambio2Bs => CAMBIO_2_BS,
            DeviceCommand::Cambio2_50Bs => CAMBIO_2_50_BS,
            DeviceCommand::Cambio3Bs => CAMBIO_3_BS,
        }
    }

    /// Symbolic name used in device documentation and logs
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::BillEnables => "BillEnables",
            DeviceCommand::Status => "Status",
            DeviceCommand::AcceptBill => "AcceptBill",
            DeviceCommand::RejectBill => "RejectBill",
            DeviceCommand::InhibitBills => "InhibitBills",
            DeviceCommand::DesinhibitBilletero => "DesinhibitBilletero",
            DeviceCommand::BilleteroEnEspera => "BilleteroEnEspera",
            DeviceCommand::Enable10 => "Enable10",
            DeviceCommand::Enable10To20 => "Enable10_20",
            DeviceCommand::Enable10To50 => "Enable10_20_50",
            DeviceCommand::Enable10To100 => "Enable10_20_50_100",
            DeviceCommand::Enable10To200 => "Enable10_20_50_100_200",
            DeviceCommand::EnableAll => "EnableAll",
            DeviceCommand::EnableMonedero => "EnableMonedero",
            DeviceCommand::InhibitMonedero => "InhibitMonedero",
            DeviceCommand::TubeStatus => "TubeStatus",
            DeviceCommand::PullMonedero => "PullMonedero",
            DeviceCommand::Cambio10Ctvs => "Cambio10Ctvs",
            DeviceCommand::Cambio20Ctvs => "Cambio20Ctvs",
            DeviceCommand::Cambio50Ctvs => "Cambio50Ctvs",
            DeviceCommand::Cambio1Bs => "Cambio1Bs",
            DeviceCommand::Cambio1_50Bs => "Cambio1_50Bs",
            DeviceCommand::Cambio2Bs => "Cambio2Bs",
            DeviceCommand::Cambio2_50Bs => "Cambio2_50Bs",
            DeviceCommand::Cambio3Bs => "Cambio3Bs",
        }
    }

    /// Device the command is addressed to
    pub fn device(&self) -> Device {
        match self {
            DeviceCommand::BillEnables
            | DeviceCommand::Status
            | DeviceCommand::AcceptBill
            | DeviceCommand::RejectBill
            | DeviceCommand::InhibitBills
            | DeviceCommand::DesinhibitBilletero
            | DeviceCommand::BilleteroEnEspera
            | DeviceCommand::Enable10
            | DeviceCommand::Enable10To20
            | DeviceCommand::Enable10To50
            | DeviceCommand::Enable10To100
            | DeviceCommand::Enable10To200
            | DeviceCommand::EnableAll => Device::BillAcceptor,
            _ => Device::CoinChanger,
        }
    }
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DeviceCommand; 25] = [
        DeviceCommand::BillEnables,
        DeviceCommand::Status,
        DeviceCommand::AcceptBill,
        DeviceCommand::RejectBill,
        DeviceCommand::InhibitBills,
        DeviceCommand::DesinhibitBilletero,
        DeviceCommand::BilleteroEnEspera,
        DeviceCommand::Enable10,
        DeviceCommand::Enable10To20,
        DeviceCommand::Enable10To50,
        DeviceCommand::Enable10To100,
        DeviceCommand::Enable10To200,
        DeviceCommand::EnableAll,
        DeviceCommand::EnableMonedero,
        DeviceCommand::InhibitMonedero,
        DeviceCommand::TubeStatus,
        DeviceCommand::PullMonedero,
        DeviceCommand::Cambio10Ctvs,
        DeviceCommand::Cambio20Ctvs,
        DeviceCommand::Cambio50Ctvs,
        DeviceCommand::Cambio1Bs,
        DeviceCommand::Cambio1_50Bs,
        DeviceCommand::Cambio2Bs,
        DeviceCommand::Cambio2_50Bs,
        DeviceCommand::Cambio3Bs,
    ];

    #[test]
    fn test_every_command_starts_with_stx() {
        for cmd in ALL {
            assert_eq!(cmd.bytes()[0], 0x02, "{} must start with 0x02", cmd);
        }
    }

    #[test]
    fn test_coin_commands_end_with_trailer() {
        for cmd in ALL.iter().filter(|c| c.device() == Device::CoinChanger) {
            assert!(cmd.bytes().ends_with(&[0x10, 0x03]), "{} missing trailer", cmd);
        }
    }

    #[test]
    fn test_bill_wire_bytes() {
        assert_eq!(DeviceCommand::Status.bytes(), &[0x02, 0x04, 0xCC, 0x2E]);
        assert_eq!(DeviceCommand::AcceptBill.bytes(), &[0x02, 0x04, 0x80, 0x7A]);
        assert_eq!(DeviceCommand::BilleteroEnEspera.bytes(), &[0x02, 0x05, 0x40, 0x00, 0xB6]);
        assert_eq!(DeviceCommand::Enable10To50.bytes().len(), 10);
        assert_eq!(DeviceCommand::Enable10To50.bytes()[1], 0x08);
        assert_eq!(DeviceCommand::EnableAll.bytes(), DeviceCommand::Enable10To200.bytes());
    }

    #[test]
    fn test_dispense_wire_bytes() {
        assert_eq!(
            DeviceCommand::Cambio2Bs.bytes(),
            &[0x02, 0x00, 0x0F, 0x02, 0x14, 0x10, 0x03]
        );
        assert_eq!(
            DeviceCommand::Cambio3Bs.bytes(),
            &[0x02, 0x00, 0x0F, 0x02, 0x1E, 0x10, 0x03]
        );
    }

    #[test]
    fn test_command_device_routing() {
        assert_eq!(DeviceCommand::Status.device(), Device::BillAcceptor);
        assert_eq!(DeviceCommand::PullMonedero.device(), Device::CoinChanger);
        assert_eq!(DeviceCommand::Cambio10Ctvs.device(), Device::CoinChanger);
    }
}
