mod deobfuscate;
mod mangle;
mod unminify;
