//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures from any
//! source that implements [`Read`] and [`Seek`]. That is the only surface
//! the parser needs, which lets it run against the partially downloaded
//! view of a remote archive.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//!
//! Local file headers and entry data are not touched here; see
//! [`RemoteZip`](super::RemoteZip) for that.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes scanned per step while searching backwards for the EOCD.
const EOCD_SEARCH_BLOCK: u64 = 1024;

/// ZIP central directory parser over a `Read + Seek` source.
pub struct ZipParser<R> {
    reader: R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: Read + Seek> ZipParser<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self { reader, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The common case (no archive comment) costs a single 22 byte read.
    /// Otherwise the tail is scanned backwards in small blocks so that only
    /// as much of the file as the comment occupies has to be readable.
    ///
    /// Returns the record, its offset and the archive comment.
    pub fn find_eocd(&mut self) -> io::Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
        let record_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < record_size {
            return Err(invalid("file too small to be a ZIP archive"));
        }

        let offset = self.size - record_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_exact_at(offset, &mut buf)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset, Vec::new()));
        }

        // The EOCD is followed by a comment: search backwards for its
        // signature, growing the window one block at a time.
        let max_search = (MAX_COMMENT_SIZE + record_size).min(self.size);
        let mut window = 0u64;
        let mut tail: Vec<u8> = Vec::new();
        while window < max_search {
            let grow = EOCD_SEARCH_BLOCK.min(max_search - window);
            window += grow;
            let start = self.size - window;

            let mut block = vec![0u8; grow as usize];
            self.read_exact_at(start, &mut block)?;
            block.extend_from_slice(&tail);
            tail = block;

            for i in (0..tail.len().saturating_sub(EndOfCentralDirectory::SIZE - 1)).rev() {
                if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                    continue;
                }
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
                if comment_len == tail.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &tail[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    let comment = tail[i + EndOfCentralDirectory::SIZE..].to_vec();
                    return Ok((eocd, start + i as u64, comment));
                }
            }
        }

        Err(invalid("end of central directory record not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&mut self, eocd_offset: u64) -> io::Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| invalid("missing ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Parse the whole central directory.
    pub fn central_directory(&mut self) -> io::Result<CentralDirectory> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;
        if eocd.is_multi_disk() {
            return Err(invalid("multi-disk archives are not supported"));
        }

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(invalid("central directory overlaps end of central directory"));
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(invalid("central directory too small for its entry count"));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact_at(cd_offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        Ok(CentralDirectory {
            entries,
            cd_offset,
            cd_size,
            eocd_offset,
            comment,
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Parse a Central Directory File Header from a cursor.
///
/// The CDFH contains metadata about a file in the archive, including its
/// name, sizes, and location of the local header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> io::Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(invalid("invalid central directory file header"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Non-UTF8 names are kept, lossily
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();
    let is_directory = file_name.ends_with('/');

    let extra_field_end = cursor.position() + extra_field_length as u64;
    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;
        let field_end = cursor.position() + field_size as u64;

        if header_id == 0x0001 {
            // ZIP64 extended information: a field is present only if the
            // corresponding header field is saturated.
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    // Skip the rest of the extra field and the file comment
    let next = extra_field_end + file_comment_length as u64;
    if next > cursor.get_ref().len() as u64 {
        return Err(invalid("central directory file header is truncated"));
    }
    cursor.set_position(next);

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}
