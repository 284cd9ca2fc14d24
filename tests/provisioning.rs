//! End-to-end provisioning against a simulated tag
//!
//! The simulated tag keeps its own command counter and checks every MAC,
//! so a host that drifts out of sync is caught by the tag, not by the host.

use ntag424::channel::derive_session_keys;
use ntag424::config::AuthConfig;
use ntag424::crypto::{self, AesKey, ZERO_IV};
use ntag424::keys;
use ntag424::messaging::{command_mac, decrypt_payload, MAC_LEN};
use ntag424::{
    Access, AccessRights, CommMode, Error, FileSettings, MasterKeySet, Mirroring, Ntag424,
    Response, SdmConfig, SdmMac, Transport, TransportError,
};

const UID: [u8; 7] = [0x04, 0x1E, 0x3C, 0x52, 0x6A, 0x71, 0x80];
const RND_B: [u8; 16] = [
    0xB9, 0xE2, 0xFC, 0x78, 0x9B, 0x64, 0xBF, 0x23, 0x7C, 0xCC, 0xAA, 0x20, 0xEC, 0x7E, 0x6E, 0x48,
];
const TI: [u8; 4] = [0x9D, 0x00, 0xC4, 0xDF];

struct TagSession {
    enc: AesKey,
    mac: AesKey,
    counter: u16,
}

struct SimulatedTag {
    keys: [AesKey; 5],
    pending_key: Option<usize>,
    session: Option<TagSession>,
    ndef_file: Vec<u8>,
    received_settings: Vec<(u8, Vec<u8>)>,
    received_keys: Vec<(u8, Vec<u8>)>,
    /// Answer the first command with this INS using the given status
    reject: Option<(u8, u8, u8)>,
    removed: bool,
    sent: Vec<Vec<u8>>,
}

impl SimulatedTag {
    fn new(keys: [AesKey; 5]) -> Self {
        Self {
            keys,
            pending_key: None,
            session: None,
            ndef_file: vec![0u8; 256],
            received_settings: Vec::new(),
            received_keys: Vec::new(),
            reject: None,
            removed: false,
            sent: Vec::new(),
        }
    }

    fn status(sw1: u8, sw2: u8) -> Response {
        Response::new(Vec::new(), sw1, sw2)
    }

    fn handle(&mut self, apdu: &[u8]) -> Response {
        if apdu[..2] == [0x00, 0xA4] {
            return Self::status(0x90, 0x00);
        }
        assert_eq!(apdu[0], 0x90, "native commands are wrapped with CLA 0x90");
        let ins = apdu[1];
        let lc = apdu[4] as usize;
        let body = &apdu[5..5 + lc];
        assert_eq!(apdu.len(), 6 + lc, "Le byte follows the body");

        if let Some((code, sw1, sw2)) = self.reject {
            if code == ins {
                self.reject = None;
                self.session = None;
                return Self::status(sw1, sw2);
            }
        }

        match ins {
            0x71 => {
                let key_no = body[0] as usize;
                self.session = None;
                self.pending_key = Some(key_no);
                let enc_rnd_b = crypto::cbc_encrypt(&self.keys[key_no], &ZERO_IV, &RND_B).unwrap();
                Response::new(enc_rnd_b, 0x91, 0xAF)
            }
            0xAF => {
                let Some(key_no) = self.pending_key.take() else {
                    return Self::status(0x91, 0xCA);
                };
                let key = self.keys[key_no];
                let token = crypto::cbc_decrypt(&key, &ZERO_IV, body).unwrap();
                if token[16..] != crypto::rotate_left(&RND_B) {
                    return Self::status(0x91, 0xAE);
                }
                let mut rnd_a = [0u8; 16];
                rnd_a.copy_from_slice(&token[..16]);

                let mut plain = [0u8; 32];
                plain[..4].copy_from_slice(&TI);
                plain[4..20].copy_from_slice(&crypto::rotate_left(&rnd_a));
                let enc_data = crypto::cbc_encrypt(&key, &ZERO_IV, &plain).unwrap();

                let keys = derive_session_keys(&key, &rnd_a, &RND_B);
                self.session = Some(TagSession {
                    enc: keys.enc,
                    mac: keys.mac,
                    counter: 0,
                });
                Response::new(enc_data, 0x91, 0x00)
            }
            0x5F | 0xC4 => {
                let Some(session) = self.session.as_mut() else {
                    return Self::status(0x91, 0xAE);
                };
                let header = &body[..1];
                let ciphertext = &body[1..body.len() - MAC_LEN];
                let mac = &body[body.len() - MAC_LEN..];
                let expected = command_mac(&session.mac, ins, session.counter, &TI, header, ciphertext);
                if mac != expected {
                    self.session = None;
                    return Self::status(0x91, 0x1E);
                }
                let plain = decrypt_payload(&session.enc, &TI, session.counter, ciphertext).unwrap();
                session.counter += 1;
                if ins == 0x5F {
                    self.received_settings.push((header[0], plain));
                } else {
                    self.received_keys.push((header[0], plain));
                }
                Response::new(vec![0u8; MAC_LEN], 0x91, 0x00)
            }
            0x8D => {
                let Some(session) = self.session.as_mut() else {
                    return Self::status(0x91, 0xAE);
                };
                let offset = u32::from_le_bytes([body[1], body[2], body[3], 0]) as usize;
                let len = u32::from_le_bytes([body[4], body[5], body[6], 0]) as usize;
                let data = &body[7..];
                assert_eq!(data.len(), len);
                self.ndef_file[offset..offset + len].copy_from_slice(data);
                session.counter += 1;
                Self::status(0x91, 0x00)
            }
            _ => Self::status(0x91, 0x1C),
        }
    }
}

impl Transport for SimulatedTag {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Response, TransportError> {
        self.sent.push(apdu.to_vec());
        if self.removed {
            return Err(TransportError::new("tag left the field"));
        }
        Ok(self.handle(apdu))
    }
}

fn zero_master_keys() -> MasterKeySet {
    MasterKeySet::new((0..=4).map(|slot| (slot, [0u8; 16]))).unwrap()
}

fn diversified_tag() -> SimulatedTag {
    let k = keys::derive(&[0u8; 16], &UID);
    SimulatedTag::new([k; 5])
}

fn sdm_settings(picc_data_offset: u32, mac_offset: u32) -> FileSettings {
    FileSettings {
        comm_mode: CommMode::Plain,
        access_rights: AccessRights {
            read: Access::Free,
            write: Access::Key(0),
            read_write: Access::Key(0),
            change: Access::Key(0),
        },
        sdm: Some(SdmConfig {
            mirroring: Mirroring::Encrypted {
                key: 0,
                picc_data_offset,
                mirror_uid: true,
                mirror_counter: true,
            },
            mac: Some(SdmMac {
                key: 0,
                input_offset: 0,
                mac_offset,
            }),
            counter_retrieval: Access::Key(0),
            ascii: true,
        }),
    }
}

fn ndef_template(url: &str) -> Vec<u8> {
    let url = url.as_bytes();
    let mut record = vec![0xD1, 0x01, url.len() as u8 + 1, 0x55, 0x00];
    record.extend_from_slice(url);
    let mut tlv = vec![0x03, record.len() as u8];
    tlv.extend_from_slice(&record);
    tlv.push(0xFE);
    tlv
}

#[test]
fn test_full_provisioning_flow() {
    let base_url = "https://ntag.nxp.com/424?e=";
    let picc_data_offset = base_url.len() as u32;
    let mac_offset = picc_data_offset + 32 + "&c=".len() as u32;
    let url = format!("{}{}&c={}", base_url, "0".repeat(32), "0".repeat(16));
    let ndef = ndef_template(&url);
    let settings = sdm_settings(picc_data_offset, mac_offset);

    let mut tag = diversified_tag();
    {
        let mut driver = Ntag424::new(&mut tag);
        driver.select_application().unwrap();
        driver
            .authenticate_diversified(&zero_master_keys(), 0, &UID)
            .unwrap();
        assert_eq!(driver.session().transaction_id(), Some(TI));
        assert_eq!(driver.session().command_counter(), Some(0));

        driver.change_file_settings(2, &settings).unwrap();
        driver.write_data_plain(2, 0, &ndef).unwrap();
        assert_eq!(driver.session().command_counter(), Some(2));

        let _ = driver.disconnect();
    }

    assert_eq!(tag.received_settings, vec![(2, settings.to_payload().unwrap())]);
    assert_eq!(&tag.ndef_file[..ndef.len()], &ndef[..]);
    assert_eq!(tag.session.as_ref().map(|s| s.counter), Some(2));
}

#[test]
fn test_tag_accepts_long_command_sequence() {
    let mut tag = diversified_tag();
    let mut driver = Ntag424::new(&mut tag);
    driver
        .authenticate_diversified(&zero_master_keys(), 0, &UID)
        .unwrap();

    let settings = sdm_settings(27, 62);
    for i in 0..10u16 {
        assert_eq!(driver.session().command_counter(), Some(i));
        if i % 2 == 0 {
            driver.change_file_settings(2, &settings).unwrap();
        } else {
            driver.write_data_plain(2, u32::from(i), &[i as u8]).unwrap();
        }
    }
    assert_eq!(driver.session().command_counter(), Some(10));
}

#[test]
fn test_rejected_command_forces_reauthentication() {
    let mut tag = diversified_tag();
    tag.reject = Some((0x5F, 0x91, 0x9E));
    let master = zero_master_keys();

    let mut driver = Ntag424::new(&mut tag);
    driver.authenticate_diversified(&master, 0, &UID).unwrap();
    driver.write_data_plain(2, 0, b"ok").unwrap();

    let err = driver
        .change_file_settings(2, &sdm_settings(27, 62))
        .unwrap_err();
    match err {
        Error::Command { command, status } => {
            assert_eq!(command, 0x5F);
            assert_eq!((status.sw1, status.sw2), (0x91, 0x9E));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!driver.is_authenticated());

    // fails fast without reaching the tag
    let err = driver.write_data_plain(2, 0, b"late").unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));

    driver.authenticate_diversified(&master, 0, &UID).unwrap();
    assert_eq!(driver.session().command_counter(), Some(0));
    driver.write_data_plain(2, 0, b"again").unwrap();
    assert_eq!(driver.session().command_counter(), Some(1));
    let _ = driver.disconnect();

    let instructions: Vec<u8> = tag.sent.iter().map(|apdu| apdu[1]).collect();
    assert_eq!(instructions, vec![0x71, 0xAF, 0x8D, 0x5F, 0x71, 0xAF, 0x8D]);
    assert_eq!(&tag.ndef_file[..5], b"again");
}

#[test]
fn test_integrity_error_on_change_key() {
    let mut tag = diversified_tag();
    tag.reject = Some((0xC4, 0x91, 0x1E));
    let current = keys::derive(&[0u8; 16], &UID);

    let mut driver = Ntag424::new(&mut tag);
    driver.authenticate(0, &current).unwrap();
    let err = driver.change_key(0, &[0x11; 16], &current, 1).unwrap_err();
    assert!(matches!(err, Error::Command { command: 0xC4, .. }));
    assert!(err.to_string().contains("0xC4"));
    assert_eq!(driver.session().command_counter(), None);
    let _ = driver.disconnect();

    assert!(tag.received_keys.is_empty());
}

#[test]
fn test_wrong_key_fails_handshake() {
    let mut tag = SimulatedTag::new([[0x77u8; 16]; 5]);
    let mut driver = Ntag424::new(&mut tag);

    let err = driver.authenticate(0, &[0u8; 16]).unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert!(!driver.is_authenticated());

    let err = driver.write_data_plain(2, 0, b"nope").unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    let _ = driver.disconnect();
    assert_eq!(tag.sent.len(), 2);
}

#[test]
fn test_unknown_master_slot() {
    let mut tag = diversified_tag();
    let master = MasterKeySet::new([(0, [0u8; 16])]).unwrap();
    let mut driver = Ntag424::new(&mut tag);
    let err = driver.authenticate_diversified(&master, 3, &UID).unwrap_err();
    assert!(matches!(err, Error::UnknownKeySlot(3)));
}

#[test]
fn test_failed_key_lookup_drops_previous_session() {
    let mut tag = diversified_tag();
    let partial = MasterKeySet::new([(0, [0u8; 16])]).unwrap();

    let mut driver = Ntag424::new(&mut tag);
    driver.authenticate_diversified(&partial, 0, &UID).unwrap();
    assert!(driver.is_authenticated());

    let err = driver.authenticate_diversified(&partial, 3, &UID).unwrap_err();
    assert!(matches!(err, Error::UnknownKeySlot(3)));
    assert!(!driver.is_authenticated());

    let err = driver.write_data_plain(2, 0, b"stale").unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    let _ = driver.disconnect();
    assert_eq!(tag.sent.len(), 2);
}

#[test]
fn test_authenticate_with_config_diversified() {
    let mut tag = diversified_tag();
    let auth = AuthConfig {
        key_no: 0,
        diversify: true,
    };

    let mut driver = Ntag424::new(&mut tag);
    driver
        .authenticate_with_config(&auth, &zero_master_keys(), &UID)
        .unwrap();
    assert_eq!(driver.session().command_counter(), Some(0));
}

#[test]
fn test_authenticate_with_config_master_key() {
    let master = [0x33u8; 16];
    let keys = MasterKeySet::new([(2, master)]).unwrap();
    let mut tag = SimulatedTag::new([master; 5]);
    let mut auth = AuthConfig {
        key_no: 2,
        diversify: false,
    };

    let mut driver = Ntag424::new(&mut tag);
    driver.authenticate_with_config(&auth, &keys, &UID).unwrap();
    assert!(driver.is_authenticated());

    // the tag holds the undiversified key, so diversifying must fail
    auth.diversify = true;
    let err = driver.authenticate_with_config(&auth, &keys, &UID).unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert!(!driver.is_authenticated());

    auth.diversify = false;
    auth.key_no = 1;
    let err = driver.authenticate_with_config(&auth, &keys, &UID).unwrap_err();
    assert!(matches!(err, Error::UnknownKeySlot(1)));
}

#[test]
fn test_tag_removed_mid_session() {
    let mut tag = diversified_tag();
    let mut driver = Ntag424::new(&mut tag);
    driver
        .authenticate_diversified(&zero_master_keys(), 0, &UID)
        .unwrap();
    let tag = driver.disconnect();
    tag.removed = true;

    let mut driver = Ntag424::new(&mut *tag);
    let err = driver.select_application().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[test]
fn test_change_key_reaches_tag() {
    let mut tag = diversified_tag();
    let current = keys::derive(&[0u8; 16], &UID);
    let new_key = [0x5Au8; 16];

    let mut driver = Ntag424::new(&mut tag);
    driver.authenticate(0, &current).unwrap();
    driver.change_key(1, &new_key, &current, 1).unwrap();
    let _ = driver.disconnect();

    let mut expected = new_key.to_vec();
    expected.push(1);
    expected.extend_from_slice(&current);
    assert_eq!(tag.received_keys, vec![(1, expected)]);
}

#[test]
fn test_write_data_plain_wire_bytes() {
    let mut tag = diversified_tag();
    let mut driver = Ntag424::new(&mut tag);
    driver
        .authenticate_diversified(&zero_master_keys(), 0, &UID)
        .unwrap();
    driver.write_data_plain(2, 0x20, &[0xDE, 0xAD]).unwrap();
    let _ = driver.disconnect();

    let apdu = tag.sent.last().unwrap();
    assert_eq!(
        apdu,
        &vec![0x90, 0x8D, 0x00, 0x00, 0x09, 0x02, 0x20, 0x00, 0x00, 0x02, 0x00, 0x00, 0xDE, 0xAD, 0x00]
    );
}
