use crate::checksum::{get_u16, put_u16};
use crate::types::{EtherType, MacAddr};

pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_ADDR_LEN: usize = 6;

const DST_OFF: usize = 0;
const SRC_OFF: usize = 6;
const TYPE_OFF: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    #[inline]
    pub fn kind(&self) -> Option<EtherType> {
        EtherType::from_u16(self.ethertype)
    }
}

pub fn parse_header(frame: &[u8]) -> Option<EthernetHeader> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    Some(EthernetHeader {
        dst: MacAddr::read(frame, DST_OFF)?,
        src: MacAddr::read(frame, SRC_OFF)?,
        ethertype: get_u16(frame, TYPE_OFF),
    })
}

/// Write an Ethernet header at the start of `frame`.
pub fn write_header(frame: &mut [u8], dst: MacAddr, src: MacAddr, ethertype: EtherType) {
    frame[DST_OFF..DST_OFF + ETH_ADDR_LEN].copy_from_slice(&dst.0);
    frame[SRC_OFF..SRC_OFF + ETH_ADDR_LEN].copy_from_slice(&src.0);
    put_u16(frame, TYPE_OFF, ethertype.as_u16());
}

/// Turn a received header around in place: the sender becomes the
/// destination and `local` becomes the source.
pub fn reflect_header(frame: &mut [u8], local: MacAddr) {
    frame.copy_within(SRC_OFF..SRC_OFF + ETH_ADDR_LEN, DST_OFF);
    frame[SRC_OFF..SRC_OFF + ETH_ADDR_LEN].copy_from_slice(&local.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_reflect() {
        let mut frame = [0u8; 20];
        let peer = MacAddr([2, 0, 0, 0, 0, 1]);
        let local = MacAddr([2, 0, 0, 0, 0, 2]);
        write_header(&mut frame, local, peer, EtherType::Arp);
        let hdr = parse_header(&frame).expect("header");
        assert_eq!(hdr.dst, local);
        assert_eq!(hdr.src, peer);
        assert_eq!(hdr.kind(), Some(EtherType::Arp));

        reflect_header(&mut frame, local);
        let hdr = parse_header(&frame).expect("header");
        assert_eq!(hdr.dst, peer);
        assert_eq!(hdr.src, local);
    }

    #[test]
    fn short_frame_rejected() {
        assert!(parse_header(&[0u8; 13]).is_none());
    }
}
