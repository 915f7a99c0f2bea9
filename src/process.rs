//! Turns one fixed-up FILE record into a [`Node`] and its streams.

use log::trace;

use crate::error::{Error, Result};
use crate::mft::{
    Attribute, AttributeIter, AttributeType, FileNameAttr, FileRecordHeader, StandardInformation,
};
use crate::names::NameTableBuilder;
use crate::node::{FileAttributes, Node, ROOT_DIRECTORY, RetrieveMode, Stream, Timestamps};
use crate::runlist::decode_run_list;

#[derive(Debug, Clone, Default)]
pub struct ProcessedRecord {
    pub node: Node,
    pub streams: Vec<Stream>,
    pub timestamps: Option<Timestamps>,
}

pub struct AttributeProcessor<'a> {
    names: &'a mut NameTableBuilder,
    mode: RetrieveMode,
}

impl<'a> AttributeProcessor<'a> {
    pub fn new(names: &'a mut NameTableBuilder, mode: RetrieveMode) -> Self {
        Self { names, mode }
    }

    /// Decode the record of `inode` held in `buf`.
    ///
    /// Returns `None` for slots that do not describe a file: no FILE signature,
    /// not in use, or an extension of another record. The streams of the $MFT
    /// record (`is_mft`) are always decoded with their fragments.
    pub fn process_record(
        &mut self,
        buf: &[u8],
        inode: u32,
        is_mft: bool,
    ) -> Result<Option<ProcessedRecord>> {
        let Some(header) = FileRecordHeader::parse(buf, inode)? else {
            trace!("Inode {} has no FILE signature, skipping.", inode);
            return Ok(None);
        };
        if !header.in_use() {
            return Ok(None);
        }
        if header.base_inode() != 0 {
            trace!(
                "Inode {} extends inode {}, skipping.",
                inode,
                header.base_inode()
            );
            return Ok(None);
        }

        let attrs_offset = header.attrs_offset as usize;
        let in_use = header.bytes_in_use as usize;
        if in_use > buf.len() {
            return Err(Error::CorruptAttribute {
                inode,
                reason: format!(
                    "record claims {} bytes in use but is {} bytes long",
                    in_use,
                    buf.len()
                ),
            });
        }
        if attrs_offset >= in_use {
            return Err(Error::CorruptAttribute {
                inode,
                reason: format!("attributes start at 0x{:X}, outside the record", attrs_offset),
            });
        }

        let mut out = ProcessedRecord {
            node: Node {
                parent_index: ROOT_DIRECTORY,
                ..Node::default()
            },
            ..ProcessedRecord::default()
        };
        if header.is_dir() {
            out.node.attributes |= FileAttributes::DIRECTORY;
        }

        for attr in AttributeIter::new(&buf[attrs_offset..in_use], inode) {
            self.process_attribute(attr?, inode, is_mft, &mut out)?;
        }

        if let Some(first) = out.streams.first() {
            out.node.size = first.size;
        }
        Ok(Some(out))
    }

    fn process_attribute(
        &mut self,
        attr: Attribute<'_>,
        inode: u32,
        is_mft: bool,
        out: &mut ProcessedRecord,
    ) -> Result<()> {
        // Extension records are not followed.
        if attr.header().attr_type == AttributeType::AttributeList {
            return Ok(());
        }

        match attr {
            Attribute::Resident { header, value } => match header.attr_type {
                AttributeType::FileName => {
                    let fname = FileNameAttr::parse(value, inode)?;
                    let parent = u32::try_from(fname.parent_ref).map_err(|_| {
                        Error::UnsupportedInodeWidth {
                            inode,
                            parent: fname.parent_ref,
                        }
                    })?;
                    if fname.namespace.is_win32() || out.node.name_index == 0 {
                        out.node.name_index = self.names.intern(&fname.name);
                        out.node.parent_index = parent;
                    }
                }
                AttributeType::StandardInformation => {
                    let si = StandardInformation::parse(value, inode)?;
                    out.node.attributes |= FileAttributes::from_bits_retain(si.file_attrs);
                    if self.mode.timestamps() {
                        out.timestamps = Some(Timestamps {
                            creation: si.created,
                            last_change: si.modified,
                            last_access: si.accessed,
                        });
                    }
                }
                AttributeType::Data if !header.is_named() => {
                    out.node.size = value.len() as u64;
                }
                _ => {}
            },
            Attribute::NonResident {
                header,
                non_resident,
                run_list,
            } => {
                if header.attr_type == AttributeType::Data
                    && !header.is_named()
                    && out.node.size == 0
                {
                    out.node.size = non_resident.real_size;
                }

                if !(is_mft || self.mode.streams()) {
                    return Ok(());
                }

                let name_index = header.name().map_or(0, |n| self.names.intern(&n));
                let pos = match out
                    .streams
                    .iter()
                    .position(|s| s.kind == header.attr_type && s.name_index == name_index)
                {
                    Some(pos) => pos,
                    None => {
                        out.streams.push(Stream::new(
                            header.attr_type,
                            name_index,
                            non_resident.real_size,
                        ));
                        out.streams.len() - 1
                    }
                };
                let stream = &mut out.streams[pos];
                if stream.size == 0 {
                    stream.size = non_resident.real_size;
                }

                if is_mft || self.mode.fragments() {
                    let runs = decode_run_list(run_list, non_resident.lowest_vcn)?;
                    stream.fragments.extend(runs.fragments);
                    stream.clusters += runs.clusters;
                }
            }
        }
        Ok(())
    }
}
