pub(super) mod opcodes;
