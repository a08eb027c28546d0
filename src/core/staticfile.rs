// src/core/staticfile.rs

//! The fixed manifest of static assets the target application must serve
//! byte-for-byte.

pub struct StaticFile {
    pub path: &'static str,
    pub size: u64,
    pub md5: &'static str,
}

pub static STATIC_FILES: &[StaticFile] = &[
    StaticFile {
        path: "/css/bootstrap.min.css",
        size: 150996,
        md5: "7e923ad223e9f33e54d22e50cf2bcce5",
    },
    StaticFile {
        path: "/css/main.css",
        size: 1741,
        md5: "d8c2a974e5816bd9f839f84a77348970",
    },
    StaticFile {
        path: "/favicon.ico",
        size: 318,
        md5: "7157dc4688c274fe0bc2e3122cac19c9",
    },
    StaticFile {
        path: "/fonts/glyphicons-halflings-regular.eot",
        size: 20127,
        md5: "f4769f9bdb7466be65088239c12046d1",
    },
    StaticFile {
        path: "/fonts/glyphicons-halflings-regular.svg",
        size: 108738,
        md5: "89889688147bd7575d6327160d64e760",
    },
    StaticFile {
        path: "/fonts/glyphicons-halflings-regular.ttf",
        size: 45404,
        md5: "e18bbf611f2a2e43afc071aa2f4e1512",
    },
    StaticFile {
        path: "/fonts/glyphicons-halflings-regular.woff",
        size: 23424,
        md5: "fa2772327f55d8198301fdb8bcfc8158",
    },
    StaticFile {
        path: "/fonts/glyphicons-halflings-regular.woff2",
        size: 18028,
        md5: "448c34a56d699c29117adc64c43affeb",
    },
    StaticFile {
        path: "/js/bootstrap.min.js",
        size: 46653,
        md5: "0827a0bdcd9a917990eee461a77dd33e",
    },
    StaticFile {
        path: "/js/chat.js",
        size: 4162,
        md5: "c557e68d34fdfb347fa4cf00e1eba7bd",
    },
    StaticFile {
        path: "/js/jquery.min.js",
        size: 86659,
        md5: "c9f5aeeca3ad37bf2aa006139b935f0a",
    },
    StaticFile {
        path: "/js/tether.min.js",
        size: 24632,
        md5: "1c4a5999a2b43cdd3aaa88a04f24c961",
    },
];
