//! Pretty-printing the decoded tree. Pure presentation: the decoder never
//! consults this module, and nothing here can fail the decode.

use std::fmt::Write as _;

use crate::decode::BitstreamDecoder;
use crate::schema::blocks::{
    AttributeCode, BlockId, ConstantsCodes, FunctionCode, MetadataCode, ModuleCode, TypeCode,
    ValueSymtabCode,
};
use crate::tree::{Block, Node, Record};

/// Render a decoded tree as indented pseudo-XML to `out`.
pub struct TreeRenderer<'a> {
    decoder: &'a BitstreamDecoder,
    pretty_metadata: bool,
}

impl<'a> TreeRenderer<'a> {
    #[must_use]
    pub fn new(decoder: &'a BitstreamDecoder, pretty_metadata: bool) -> Self {
        Self {
            decoder,
            pretty_metadata,
        }
    }

    pub fn render(&self, root: &Block<'_>) -> String {
        let mut out = String::new();
        self.render_block(&mut out, root, 0);
        out
    }

    fn render_block(&self, out: &mut String, block: &Block<'_>, depth: usize) {
        let indent = "  ".repeat(depth);
        let name = self.block_name(block.id);
        writeln!(
            out,
            "{indent}<{name} id={} words={}>",
            block.id, block.dword_length
        )
        .unwrap();

        if block.id == BlockId::Metadata as u32 && self.pretty_metadata {
            self.render_metadata_children(out, &block.children, depth + 1);
        } else {
            let mut children = block.children.iter().peekable();
            while let Some(child) = children.next() {
                match child {
                    Node::Block(b) => self.render_block(out, b, depth + 1),
                    Node::Record(r) => self.render_record(out, block.id, r, depth + 1),
                }
            }
        }

        writeln!(out, "{indent}</{name}>").unwrap();
    }

    fn render_record(&self, out: &mut String, block_id: u32, record: &Record<'_>, depth: usize) {
        let indent = "  ".repeat(depth);
        let name = self.record_name(block_id, record.id);
        write!(out, "{indent}<{name} id={}", record.id).unwrap();
        if self.pretty_metadata && is_string_record(block_id, record.id) {
            let s = decode_operand_string(&record.operands);
            write!(out, " value=\"{}\"", escape_string(&s)).unwrap();
        } else {
            for (i, op) in record.operands.iter().enumerate() {
                write!(out, " op{i}={op}").unwrap();
            }
        }
        if let Some(blob) = record.blob {
            write!(out, " blob_len={}", blob.len()).unwrap();
        }
        writeln!(out, "/>").unwrap();
    }

    fn block_name(&self, block_id: u32) -> String {
        if block_id == 0 {
            return "BLOCKINFO".to_string();
        }
        if let Some(name) = self
            .decoder
            .block_info()
            .get(&block_id)
            .and_then(|info| info.name.clone())
        {
            return name;
        }
        match u8::try_from(block_id).ok().and_then(|b| BlockId::try_from(b).ok()) {
            Some(id) => format!("{id:?}").to_uppercase(),
            None => format!("BLOCK{block_id}"),
        }
    }

    fn record_name(&self, block_id: u32, record_id: u64) -> String {
        if let Some(name) = self
            .decoder
            .block_info()
            .get(&block_id)
            .and_then(|info| info.record_names.get(&record_id))
        {
            return name.clone();
        }

        let Some(block) = u8::try_from(block_id).ok().and_then(|b| BlockId::try_from(b).ok()) else {
            return format!("RECORD{record_id}");
        };
        let Ok(code) = u8::try_from(record_id) else {
            return format!("RECORD{record_id}");
        };

        let name = match block {
            BlockId::Module => ModuleCode::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::Metadata => MetadataCode::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::Type => TypeCode::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::Constants => ConstantsCodes::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::Function => FunctionCode::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::ValueSymtab => ValueSymtabCode::try_from(code).ok().map(|c| format!("{c:?}")),
            BlockId::ParamAttr => AttributeCode::try_from(code).ok().map(|c| format!("{c:?}")),
            _ => None,
        };
        name.unwrap_or_else(|| format!("RECORD{record_id}"))
    }

    /// Walk the metadata block's children, pairing `NAME` with the
    /// immediately following `NAMED_NODE` and special-casing the other
    /// debug-info record kinds listed for the metadata pretty-printer.
    fn render_metadata_children(&self, out: &mut String, children: &[Node<'_>], depth: usize) {
        let indent = "  ".repeat(depth);
        let mut pending_name: Option<String> = None;
        let mut iter = children.iter().peekable();
        while let Some(child) = iter.next() {
            let Node::Record(record) = child else {
                if let Node::Block(b) = child {
                    self.render_block(out, b, depth);
                }
                continue;
            };
            let Some(code) = u8::try_from(record.id).ok().and_then(|c| MetadataCode::try_from(c).ok())
            else {
                self.render_record(out, BlockId::Metadata as u32, record, depth);
                continue;
            };

            match code {
                MetadataCode::Name => {
                    pending_name = decode_operand_string(&record.operands).into();
                }
                MetadataCode::NamedNode => {
                    let label = pending_name.take().unwrap_or_else(|| "NAMED_NODE".to_string());
                    let refs = mdref_list(&record.operands);
                    writeln!(out, "{indent}<NamedMD name=\"{label}\" nodes={refs}/>").unwrap();
                }
                MetadataCode::Kind => {
                    if let Some((&idx, name_ops)) = record.operands.split_first() {
                        let name = decode_operand_string(name_ops);
                        writeln!(out, "{indent}!{idx} = !\"{}\"", escape_string(&name)).unwrap();
                    }
                }
                MetadataCode::StringOld => {
                    let s = decode_operand_string(&record.operands);
                    writeln!(out, "{indent}<MDString value=\"{}\"/>", escape_string(&s)).unwrap();
                }
                MetadataCode::File => {
                    let filename = record.operands.first().copied().unwrap_or(0);
                    let directory = record.operands.get(1).copied().unwrap_or(0);
                    writeln!(
                        out,
                        "{indent}!DIFile(filename: {}, directory: {})",
                        mdref(filename),
                        mdref(directory)
                    )
                    .unwrap();
                }
                MetadataCode::Node | MetadataCode::DistinctNode => {
                    let tag = if code == MetadataCode::DistinctNode {
                        "DistinctNode"
                    } else {
                        "Node"
                    };
                    writeln!(
                        out,
                        "{indent}<{tag} operands={}/>",
                        mdref_list(&record.operands)
                    )
                    .unwrap();
                }
                MetadataCode::BasicType => writeln!(out, "{indent}!DIBasicType()").unwrap(),
                MetadataCode::DerivedType => writeln!(out, "{indent}!DIDerivedType()").unwrap(),
                MetadataCode::CompositeType => writeln!(out, "{indent}!DICompositeType()").unwrap(),
                MetadataCode::SubroutineType => writeln!(out, "{indent}!DISubroutineType()").unwrap(),
                MetadataCode::TemplateType => writeln!(out, "{indent}!DITemplateTypeParameter()").unwrap(),
                MetadataCode::TemplateValue => writeln!(out, "{indent}!DITemplateValueParameter()").unwrap(),
                MetadataCode::Subprogram => writeln!(out, "{indent}!DISubprogram()").unwrap(),
                MetadataCode::Location => writeln!(out, "{indent}!DILocation()").unwrap(),
                MetadataCode::LocalVar => writeln!(out, "{indent}!DILocalVariable()").unwrap(),
                MetadataCode::Value => {
                    writeln!(out, "{indent}<ValueAsMetadata/>").unwrap();
                }
                MetadataCode::Expression => {
                    writeln!(
                        out,
                        "{indent}<DIExpression ops={}/>",
                        mdref_list(&record.operands)
                    )
                    .unwrap();
                }
                MetadataCode::CompileUnit => {
                    self.render_compile_unit(out, record, depth);
                }
                _ => self.render_record(out, BlockId::Metadata as u32, record, depth),
            }
        }
    }

    fn render_compile_unit(&self, out: &mut String, record: &Record<'_>, depth: usize) {
        let indent = "  ".repeat(depth);
        let ops = &record.operands;
        if ops.len() < 14 {
            self.render_record(out, BlockId::Metadata as u32, record, depth);
            return;
        }
        let distinct = if ops[0] != 0 { "distinct " } else { "distinct? " };
        write!(
            out,
            "{indent}{distinct}!DICompileUnit(language: {}, file: {}, producer: {}, \
             isOptimized: {}, flags: {}, runtimeVersion: {}, splitDebugFilename: {}, \
             emissionKind: {}, enums: {}, retainedTypes: {}, subprograms: {}, globals: {}, \
             imports: {}",
            ops[1],
            mdref(ops[2]),
            mdref(ops[3]),
            if ops[4] != 0 { "true" } else { "false" },
            mdref(ops[5]),
            ops[6],
            mdref(ops[7]),
            ops[8],
            mdref(ops[9]),
            mdref(ops[10]),
            mdref(ops[11]),
            mdref(ops[12]),
            mdref(ops[13]),
        )
        .unwrap();
        if let Some(dwo_id) = ops.get(14) {
            write!(out, ", dwoId: {dwo_id}").unwrap();
        }
        writeln!(out, ")").unwrap();
    }
}

fn mdref(v: u64) -> String {
    if v == 0 {
        "null".to_string()
    } else {
        format!("!{}", v - 1)
    }
}

fn mdref_list(ops: &[u64]) -> String {
    let rendered: Vec<String> = ops.iter().map(|&v| mdref(v)).collect();
    format!("[{}]", rendered.join(", "))
}

fn is_string_record(block_id: u32, record_id: u64) -> bool {
    block_id == BlockId::Metadata as u32
        && matches!(
            u8::try_from(record_id).ok().and_then(|c| MetadataCode::try_from(c).ok()),
            Some(MetadataCode::StringOld | MetadataCode::Name | MetadataCode::Kind)
        )
}

fn decode_operand_string(operands: &[u64]) -> String {
    operands.iter().map(|&b| b as u8 as char).collect()
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(decoder: &BitstreamDecoder, pretty_metadata: bool) -> TreeRenderer<'_> {
        TreeRenderer::new(decoder, pretty_metadata)
    }

    #[test]
    fn renders_a_generic_block_and_record() {
        let decoder = BitstreamDecoder::new();
        let block = Block {
            id: BlockId::Module as u32,
            dword_length: 3,
            children: vec![Node::Record(Record {
                id: ModuleCode::Version as u64,
                operands: vec![2],
                blob: None,
            })],
        };
        let out = renderer(&decoder, true).render(&block);
        assert!(out.contains("<MODULE id=8 words=3>"));
        assert!(out.contains("<Version id=1 op0=2/>"));
        assert!(out.contains("</MODULE>"));
    }

    #[test]
    fn renders_a_compile_unit_with_the_original_field_order() {
        let decoder = BitstreamDecoder::new();
        let record = Record {
            id: MetadataCode::CompileUnit as u64,
            operands: vec![1, 4, 3, 2, 1, 5, 100, 0, 3, 6, 7, 8, 9, 10],
            blob: None,
        };
        let block = Block {
            id: BlockId::Metadata as u32,
            dword_length: 1,
            children: vec![Node::Record(record)],
        };
        let out = renderer(&decoder, true).render(&block);
        assert!(out.contains(
            "distinct !DICompileUnit(language: 4, file: !2, producer: !1, isOptimized: true, \
             flags: !4, runtimeVersion: 100, splitDebugFilename: null, emissionKind: 3, \
             enums: !5, retainedTypes: !6, subprograms: !7, globals: !8, imports: !9)"
        ));
        assert!(!out.contains("macros"));
        assert!(!out.contains("splitDebugInlining"));
    }

    #[test]
    fn compile_unit_with_a_trailing_dwo_id_prints_it() {
        let decoder = BitstreamDecoder::new();
        let mut operands = vec![0u64, 4, 3, 2, 0, 5, 100, 0, 3, 6, 7, 8, 9, 10];
        operands.push(42); // dwoId
        let record = Record {
            id: MetadataCode::CompileUnit as u64,
            operands,
            blob: None,
        };
        let block = Block {
            id: BlockId::Metadata as u32,
            dword_length: 1,
            children: vec![Node::Record(record)],
        };
        let out = renderer(&decoder, true).render(&block);
        assert!(out.contains("distinct? !DICompileUnit("));
        assert!(out.contains("isOptimized: false"));
        assert!(out.contains(", dwoId: 42)"));
    }

    #[test]
    fn no_pretty_metadata_falls_back_to_generic_rendering() {
        let decoder = BitstreamDecoder::new();
        let record = Record {
            id: MetadataCode::StringOld as u64,
            operands: "hi".bytes().map(u64::from).collect(),
            blob: None,
        };
        let block = Block {
            id: BlockId::Metadata as u32,
            dword_length: 1,
            children: vec![Node::Record(record)],
        };
        let out = renderer(&decoder, false).render(&block);
        assert!(out.contains("op0=104 op1=105"));
        assert!(!out.contains("value=\"hi\""));
    }

    #[test]
    fn name_and_named_node_are_paired() {
        let decoder = BitstreamDecoder::new();
        let name_record = Record {
            id: MetadataCode::Name as u64,
            operands: "foo".bytes().map(u64::from).collect(),
            blob: None,
        };
        let named_node_record = Record {
            id: MetadataCode::NamedNode as u64,
            operands: vec![1, 2],
            blob: None,
        };
        let block = Block {
            id: BlockId::Metadata as u32,
            dword_length: 1,
            children: vec![
                Node::Record(name_record),
                Node::Record(named_node_record),
            ],
        };
        let out = renderer(&decoder, true).render(&block);
        assert!(out.contains("<NamedMD name=\"foo\" nodes=[!0, !1]/>"));
    }
}
