//! Round-trips a CP/M DATA-format file through an in-memory `.DSK` image:
//! write, list, read, delete, then persist and reload the raw disc bytes.
use cpcemu::cpcemu_formats::cpm;
use cpcemu::cpcemu_formats::dsk::DiscImage;
use cpcemu::cpcemu_peripherals::fdc::{Sector, SectorStore, Track};

const DELETED_MARKER: u8 = cpm::DELETED_MARKER;

fn formatted_data_disc() -> DiscImage {
    let mut disc = DiscImage::blank(cpm::TRACK_COUNT as u8, 1);
    for cyl in 0..cpm::TRACK_COUNT as u8 {
        let sectors = (0..cpm::SECTORS_PER_TRACK as u8)
            .map(|i| Sector {
                cylinder: cyl,
                head: 0,
                record: 0xC1 + i,
                size_code: 2,
                data: vec![DELETED_MARKER; 512],
            })
            .collect();
        disc.tracks[0][cyl as usize] = Track { sectors };
    }
    disc
}

#[test]
fn write_list_read_delete_round_trip() {
    let mut disc = formatted_data_disc();

    let payload = b"10 PRINT \"HELLO\"\n20 GOTO 10\n".repeat(50); // spans multiple blocks
    cpm::write_file(&mut disc, 0, "HELLO.BAS", &payload).unwrap();

    let files = cpm::list_files(&disc).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "HELLO.BAS");
    assert_eq!(files[0].size_bytes as usize, payload.len());

    let read_back = cpm::read_file(&disc, 0, "HELLO.BAS").unwrap();
    assert_eq!(read_back, payload);

    assert!(cpm::write_file(&mut disc, 0, "HELLO.BAS", b"x").is_err());

    cpm::delete_file(&mut disc, 0, "HELLO.BAS").unwrap();
    assert!(cpm::list_files(&disc).unwrap().is_empty());
    assert!(cpm::read_file(&disc, 0, "HELLO.BAS").is_err());
}

#[test]
fn disc_image_survives_a_save_load_cycle_with_file_intact() {
    let mut disc = formatted_data_disc();
    cpm::write_file(&mut disc, 0, "DATA.BIN", &[1, 2, 3, 4, 5]).unwrap();

    let mut buf = Vec::new();
    disc.save(&mut buf).unwrap();
    let loaded = DiscImage::load(&buf[..]).unwrap();

    let data = cpm::read_file(&loaded, 0, "DATA.BIN").unwrap();
    assert_eq!(data, vec![1, 2, 3, 4, 5]);
}
