use super::defs;
use super::types::{
    hw::Byte,
    schema::{OpCode, PrefixGroup},
};
use enum_map::EnumMap;
use once_cell::sync::Lazy;

static STORAGE: Lazy<Catalog> = Lazy::new(Catalog::new);

/// The opcode catalog, grouped by prefix. Built once on first use.
pub struct Catalog {
    tables: EnumMap<PrefixGroup, Vec<OpCode>>,
}

impl Catalog {
    fn new() -> Self {
        let mut builder = Builder::new();
        defs::opcodes::register(&mut builder);
        builder.build()
    }

    pub fn get() -> &'static Catalog {
        Lazy::force(&STORAGE)
    }

    pub fn group(&self, group: PrefixGroup) -> &[OpCode] {
        &self.tables[group]
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpCode> {
        self.tables.iter().flat_map(|(_, table)| table.iter())
    }

    pub fn lookup(&self, group: PrefixGroup, opcode: Byte) -> Option<&OpCode> {
        self.tables[group].iter().find(|op| op.opcode == opcode)
    }
}

pub struct Builder {
    catalog: Catalog,
}

impl Builder {
    fn new() -> Self {
        Builder {
            catalog: Catalog {
                tables: EnumMap::default(),
            },
        }
    }

    fn build(mut self) -> Catalog {
        for (_, table) in self.catalog.tables.iter_mut() {
            table.sort_by_key(|op| op.opcode);
        }
        self.catalog
    }

    pub(super) fn register(&mut self, op: OpCode) {
        assert!(
            self.catalog.lookup(op.group, op.opcode).is_none(),
            "opcode registered twice: {}",
            op
        );

        self.catalog.tables[op.group].push(op);
    }
}
